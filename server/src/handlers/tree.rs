//! Tree store reads and writes.
//!
//! Every successful mutation ends with [`publish`], which pushes a fresh
//! snapshot to each subscriber whose path overlaps the mutated one.

use serde_json::Value;
use sqlx::PgPool;
use tillsync_engine::protocol::GeneratedKey;
use tillsync_engine::validate_key;

use crate::db;
use crate::error::{AppError, Result};
use crate::tree::TreePath;
use crate::websocket::{ServerMessage, SubscriptionManager};

/// Current value at `path`, `None` when nothing is stored there.
pub async fn read_tree(pool: &PgPool, path: &TreePath) -> Result<Option<Value>> {
    let value = match path {
        TreePath::Namespace(namespace) => {
            db::namespace_value(db::list_namespace(pool, namespace).await?)
        }
        TreePath::Collection {
            namespace,
            collection,
        } => db::collection_value(db::list_collection(pool, namespace, collection).await?),
        TreePath::Document {
            namespace,
            collection,
            key,
        } => db::get_document(pool, namespace, collection, key).await?,
    };
    Ok(value)
}

/// Store `value` at `path`, replacing what was there. Writing `null`
/// deletes.
pub async fn handle_put(
    pool: &PgPool,
    subscriptions: &SubscriptionManager,
    path: &TreePath,
    value: Value,
) -> Result<()> {
    if value.is_null() {
        return handle_delete(pool, subscriptions, path).await;
    }

    match path {
        TreePath::Namespace(_) => {
            return Err(AppError::BadRequest(
                "a whole namespace cannot be overwritten".into(),
            ));
        }
        TreePath::Collection {
            namespace,
            collection,
        } => {
            let Value::Object(documents) = &value else {
                return Err(AppError::BadRequest(
                    "a collection must be written as an object keyed by document key".into(),
                ));
            };
            for key in documents.keys() {
                validate_key(key.clone())?;
            }
            db::replace_collection(pool, namespace, collection, documents).await?;
        }
        TreePath::Document {
            namespace,
            collection,
            key,
        } => db::upsert_document(pool, namespace, collection, key, &value).await?,
    }

    tracing::debug!(path = %path, "Tree written");
    publish(pool, subscriptions, path).await;
    Ok(())
}

/// Remove everything at `path`. Removing nothing is not an error.
pub async fn handle_delete(
    pool: &PgPool,
    subscriptions: &SubscriptionManager,
    path: &TreePath,
) -> Result<()> {
    let removed = match path {
        TreePath::Namespace(namespace) => db::delete_namespace(pool, namespace).await?,
        TreePath::Collection {
            namespace,
            collection,
        } => db::delete_collection(pool, namespace, collection).await?,
        TreePath::Document {
            namespace,
            collection,
            key,
        } => db::delete_document(pool, namespace, collection, key).await?,
    };

    tracing::debug!(path = %path, removed, "Tree removed");
    if removed > 0 {
        publish(pool, subscriptions, path).await;
    }
    Ok(())
}

/// Generate a fresh, time-ordered key for a new document under a collection.
pub fn generate_key(path: &TreePath) -> Result<GeneratedKey> {
    match path {
        TreePath::Collection { .. } => Ok(GeneratedKey {
            key: uuid::Uuid::now_v7().simple().to_string(),
        }),
        _ => Err(AppError::BadRequest(format!(
            "keys are generated under a collection path, not '{}'",
            path
        ))),
    }
}

/// Push the current value to every subscriber that sees a change at
/// `changed`.
///
/// Each path is read and sent under its publish lock, so concurrent writes
/// cannot deliver an older read after a newer one.
pub async fn publish(pool: &PgPool, subscriptions: &SubscriptionManager, changed: &TreePath) {
    for path in subscriptions.affected_paths(changed) {
        let _publishing = subscriptions.lock_path(&path).await;
        match read_tree(pool, &path).await {
            Ok(value) => {
                let message = ServerMessage::snapshot(path.to_string(), value);
                let sent = subscriptions.send_to_path(&path, &message);
                tracing::debug!(
                    path = %path,
                    changed = %changed,
                    recipients = sent,
                    "Snapshot published"
                );
            }
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "Failed to read snapshot for subscribers");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_hex() {
        let path = TreePath::parse("pos/sales").unwrap();
        let first = generate_key(&path).unwrap().key;
        let second = generate_key(&path).unwrap().key;

        assert_eq!(first.len(), 32);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(first, second);
    }

    #[test]
    fn keys_need_a_collection_path() {
        for raw in ["pos", "pos/sales/INV-1"] {
            let path = TreePath::parse(raw).unwrap();
            assert!(matches!(generate_key(&path), Err(AppError::BadRequest(_))));
        }
    }
}
