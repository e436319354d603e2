//! Database operations for the documents table.
//!
//! Each row is one document at `<namespace>/<collection>/<doc_key>`; a
//! collection exists exactly as long as it has rows.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::{PgPool, Row};

/// A stored document row.
#[derive(Debug)]
pub struct StoredDocument {
    pub collection: String,
    pub doc_key: String,
    pub body: Value,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredDocument {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredDocument {
            collection: row.try_get("collection")?,
            doc_key: row.try_get("doc_key")?,
            body: row.try_get("body")?,
        })
    }
}

/// Insert or overwrite one document.
pub async fn upsert_document(
    pool: &PgPool,
    namespace: &str,
    collection: &str,
    doc_key: &str,
    body: &Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO documents (namespace, collection, doc_key, body, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (namespace, collection, doc_key) DO UPDATE SET
            body = EXCLUDED.body,
            updated_at = EXCLUDED.updated_at
        "#,
    )
    .bind(namespace)
    .bind(collection)
    .bind(doc_key)
    .bind(body)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Replace a whole collection with `documents` in one transaction.
///
/// `null` children are left out, the same as deleting them.
pub async fn replace_collection(
    pool: &PgPool,
    namespace: &str,
    collection: &str,
    documents: &Map<String, Value>,
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM documents WHERE namespace = $1 AND collection = $2")
        .bind(namespace)
        .bind(collection)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now();
    for (doc_key, body) in documents.iter().filter(|(_, body)| !body.is_null()) {
        sqlx::query(
            r#"
            INSERT INTO documents (namespace, collection, doc_key, body, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(namespace)
        .bind(collection)
        .bind(doc_key)
        .bind(body)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Get one document body.
pub async fn get_document(
    pool: &PgPool,
    namespace: &str,
    collection: &str,
    doc_key: &str,
) -> Result<Option<Value>, sqlx::Error> {
    let row: Option<(Value,)> = sqlx::query_as(
        r#"
        SELECT body FROM documents
        WHERE namespace = $1 AND collection = $2 AND doc_key = $3
        "#,
    )
    .bind(namespace)
    .bind(collection)
    .bind(doc_key)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(body,)| body))
}

/// Get every document in a collection, ordered by key.
pub async fn list_collection(
    pool: &PgPool,
    namespace: &str,
    collection: &str,
) -> Result<Vec<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, doc_key, body FROM documents
        WHERE namespace = $1 AND collection = $2
        ORDER BY doc_key
        "#,
    )
    .bind(namespace)
    .bind(collection)
    .fetch_all(pool)
    .await
}

/// Get every document in a namespace, ordered by collection and key.
pub async fn list_namespace(
    pool: &PgPool,
    namespace: &str,
) -> Result<Vec<StoredDocument>, sqlx::Error> {
    sqlx::query_as::<_, StoredDocument>(
        r#"
        SELECT collection, doc_key, body FROM documents
        WHERE namespace = $1
        ORDER BY collection, doc_key
        "#,
    )
    .bind(namespace)
    .fetch_all(pool)
    .await
}

/// Delete one document. Returns the number of rows removed.
pub async fn delete_document(
    pool: &PgPool,
    namespace: &str,
    collection: &str,
    doc_key: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "DELETE FROM documents WHERE namespace = $1 AND collection = $2 AND doc_key = $3",
    )
    .bind(namespace)
    .bind(collection)
    .bind(doc_key)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete a whole collection.
pub async fn delete_collection(
    pool: &PgPool,
    namespace: &str,
    collection: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM documents WHERE namespace = $1 AND collection = $2")
        .bind(namespace)
        .bind(collection)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Delete a whole namespace.
pub async fn delete_namespace(pool: &PgPool, namespace: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM documents WHERE namespace = $1")
        .bind(namespace)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Fold a collection's rows into an object keyed by document key.
///
/// Returns `None` for an empty collection.
pub fn collection_value(documents: Vec<StoredDocument>) -> Option<Value> {
    if documents.is_empty() {
        return None;
    }
    let children: Map<String, Value> = documents
        .into_iter()
        .map(|doc| (doc.doc_key, doc.body))
        .collect();
    Some(Value::Object(children))
}

/// Fold a namespace's rows into `{collection: {key: body}}`.
pub fn namespace_value(documents: Vec<StoredDocument>) -> Option<Value> {
    if documents.is_empty() {
        return None;
    }
    let mut collections = Map::new();
    for doc in documents {
        let children = collections
            .entry(doc.collection)
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(children) = children {
            children.insert(doc.doc_key, doc.body);
        }
    }
    Some(Value::Object(collections))
}
