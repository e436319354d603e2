//! Collaborator interfaces: the device's local store and the remote tree store.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use tillsync_engine::{LocalId, NaturalKey, Record};

use crate::error::{LocalError, RemoteError, SyncError};

/// Receives the full value at a subscribed path, once on subscribe and again
/// after every change. `None` means nothing is stored there.
pub type SnapshotSender = mpsc::UnboundedSender<Option<Value>>;

/// Handle of a remote subscription.
pub type WatchId = String;

/// Durable per-collection CRUD on the device.
///
/// The store assigns `localId`s and persists records as given, including the
/// `synced` flag and `firebaseId`.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// All records of a collection, in a stable order.
    async fn read_all(&self, collection: &str) -> Result<Vec<Record>, LocalError>;

    /// Insert a record, returning its new `localId`.
    async fn create(&self, collection: &str, record: Record) -> Result<LocalId, LocalError>;

    /// Replace the record stored under `local_id`.
    async fn update(
        &self,
        collection: &str,
        local_id: LocalId,
        record: Record,
    ) -> Result<(), LocalError>;

    /// Delete one record. Deleting a missing record is not an error.
    async fn delete(&self, collection: &str, local_id: LocalId) -> Result<(), LocalError>;

    /// Delete every record of a collection.
    async fn delete_all(&self, collection: &str) -> Result<(), LocalError>;
}

/// Path-addressed tree document store.
///
/// Paths are `/`-separated segments, e.g. `pos/inventory/ITEM-001`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Overwrite the value at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<(), RemoteError>;

    /// Remove the value at `path`. Removing an absent path succeeds.
    async fn remove(&self, path: &str) -> Result<(), RemoteError>;

    /// Read the value at `path`; `None` if nothing is stored.
    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError>;

    /// Generate a fresh, unique child key under `path`.
    async fn generate_key(&self, path: &str) -> Result<NaturalKey, RemoteError>;

    /// Stream the value at `path` into `sink` until unsubscribed.
    async fn subscribe(&self, path: &str, sink: SnapshotSender) -> Result<WatchId, RemoteError>;

    /// Stop a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, watch: &WatchId);
}

/// Run a remote call under a deadline, lifting its error into [`SyncError`].
pub(crate) async fn with_deadline<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, SyncError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(SyncError::from),
        Err(_) => Err(SyncError::Timeout(deadline)),
    }
}

/// Find a local record by its `localId`.
pub(crate) async fn find_local(
    local: &dyn LocalStore,
    collection: &str,
    local_id: LocalId,
) -> Result<Option<Record>, LocalError> {
    Ok(local
        .read_all(collection)
        .await?
        .into_iter()
        .find(|record| record.local_id == Some(local_id)))
}
