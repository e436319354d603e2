//! In-memory collaborators.
//!
//! [`MemoryLocalStore`] and [`MemoryRemoteStore`] are complete implementations
//! of the store traits for embedding and tests. The remote one keeps a JSON
//! tree, pushes snapshots to subscribers, and can be told to fail.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};

use tillsync_engine::{CollectionName, LocalId, NaturalKey, Record};

use crate::error::{LocalError, RemoteError};
use crate::store::{LocalStore, RemoteStore, SnapshotSender, WatchId};

/// Local store keeping each collection in a map ordered by `localId`.
#[derive(Debug)]
pub struct MemoryLocalStore {
    collections: DashMap<CollectionName, BTreeMap<LocalId, Record>>,
    next_id: AtomicU64,
}

impl MemoryLocalStore {
    pub fn new() -> Self {
        Self {
            collections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of records stored in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, |c| c.len())
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn read_all(&self, collection: &str) -> Result<Vec<Record>, LocalError> {
        Ok(self
            .collections
            .get(collection)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, collection: &str, mut record: Record) -> Result<LocalId, LocalError> {
        let local_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        record.local_id = Some(local_id);
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(local_id, record);
        Ok(local_id)
    }

    async fn update(
        &self,
        collection: &str,
        local_id: LocalId,
        mut record: Record,
    ) -> Result<(), LocalError> {
        let mut records = self
            .collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection, local_id))?;
        let slot = records
            .get_mut(&local_id)
            .ok_or_else(|| not_found(collection, local_id))?;
        record.local_id = Some(local_id);
        *slot = record;
        Ok(())
    }

    async fn delete(&self, collection: &str, local_id: LocalId) -> Result<(), LocalError> {
        if let Some(mut records) = self.collections.get_mut(collection) {
            records.remove(&local_id);
        }
        Ok(())
    }

    async fn delete_all(&self, collection: &str) -> Result<(), LocalError> {
        self.collections.remove(collection);
        Ok(())
    }
}

fn not_found(collection: &str, local_id: LocalId) -> LocalError {
    LocalError::NotFound {
        collection: collection.to_string(),
        local_id,
    }
}

/// Split a path into its non-empty segments.
fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Check if `prefix` is `path` or one of its ancestors, segment-wise.
fn is_ancestor_or_self(prefix: &[&str], path: &[&str]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

/// Tree document store held in memory.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    root: Mutex<Value>,
    watchers: DashMap<WatchId, (String, SnapshotSender)>,
    offline: AtomicBool,
    rejected: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    failing_writes: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            root: Mutex::new(Value::Object(Map::new())),
            watchers: DashMap::new(),
            offline: AtomicBool::new(false),
            rejected: Mutex::new(HashSet::new()),
            latency: Mutex::new(None),
            failing_writes: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with [`RemoteError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make writes and removals at exactly `path` fail with
    /// [`RemoteError::Rejected`].
    pub fn reject_path(&self, path: impl Into<String>) {
        if let Ok(mut rejected) = self.rejected.lock() {
            rejected.insert(segments(&path.into()).join("/"));
        }
    }

    /// Make the next `count` writes or removals fail with
    /// [`RemoteError::Unavailable`].
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// End every live subscription from the remote side, dropping its sink.
    pub fn cancel_subscriptions(&self) {
        self.watchers.clear();
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    /// Number of successful writes and removals so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions.
    pub fn watcher_count(&self) -> usize {
        self.watchers.len()
    }

    /// Read a value without going through fault injection.
    pub fn peek(&self, path: &str) -> Option<Value> {
        let root = self.root.lock().ok()?;
        lookup(&root, &segments(path)).cloned()
    }

    async fn gate(&self, path: &str, write: bool) -> Result<(), RemoteError> {
        let latency = self.latency.lock().ok().and_then(|l| *l);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("remote store is offline".into()));
        }
        if write {
            let failing = self
                .failing_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RemoteError::Unavailable(format!("write to {} dropped", path)));
            }
            let normalized = segments(path).join("/");
            let rejected = self
                .rejected
                .lock()
                .map(|r| r.contains(&normalized))
                .unwrap_or(false);
            if rejected {
                return Err(RemoteError::Rejected(format!("permission denied at {}", path)));
            }
        }
        Ok(())
    }

    fn mutate(&self, path: &str, value: Option<Value>) -> Result<(), RemoteError> {
        let parts = segments(path);
        if parts.is_empty() {
            return Err(RemoteError::Rejected("cannot write the root".into()));
        }
        {
            let mut root = self
                .root
                .lock()
                .map_err(|_| RemoteError::Unavailable("remote state poisoned".into()))?;
            match value {
                Some(value) => insert(&mut root, &parts, value),
                None => {
                    remove(&mut root, &parts);
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notify(&parts);
        Ok(())
    }

    /// Push fresh snapshots to every watcher whose path overlaps `changed`.
    fn notify(&self, changed: &[&str]) {
        let Ok(root) = self.root.lock() else {
            return;
        };
        for entry in self.watchers.iter() {
            let (path, sink) = entry.value();
            let watched = segments(path);
            if is_ancestor_or_self(&watched, changed) || is_ancestor_or_self(changed, &watched) {
                let _ = sink.send(lookup(&root, &watched).cloned());
            }
        }
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lookup<'a>(root: &'a Value, parts: &[&str]) -> Option<&'a Value> {
    let mut node = root;
    for part in parts {
        node = node.as_object()?.get(*part)?;
    }
    (!node.is_null()).then_some(node)
}

fn insert(root: &mut Value, parts: &[&str], value: Value) {
    let Some((last, parents)) = parts.split_last() else {
        return;
    };
    let mut node = root;
    for part in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(children) = node else {
            return;
        };
        node = children
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(children) = node {
        children.insert(last.to_string(), value);
    }
}

/// Remove a value and prune parents left empty.
fn remove(node: &mut Value, parts: &[&str]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Value::Object(children) = node else {
        return false;
    };
    if rest.is_empty() {
        children.remove(*first);
    } else if let Some(child) = children.get_mut(*first) {
        if remove(child, rest) {
            children.remove(*first);
        }
    }
    children.is_empty()
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn set(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        self.gate(path, true).await?;
        self.mutate(path, Some(value))
    }

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        self.gate(path, true).await?;
        self.mutate(path, None)
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        self.gate(path, false).await?;
        Ok(self.peek(path))
    }

    async fn generate_key(&self, path: &str) -> Result<NaturalKey, RemoteError> {
        self.gate(path, false).await?;
        Ok(uuid::Uuid::now_v7().simple().to_string())
    }

    async fn subscribe(&self, path: &str, sink: SnapshotSender) -> Result<WatchId, RemoteError> {
        self.gate(path, false).await?;
        let id = uuid::Uuid::new_v4().to_string();
        self.watchers
            .insert(id.clone(), (path.to_string(), sink.clone()));
        let _ = sink.send(self.peek(path));
        Ok(id)
    }

    async fn unsubscribe(&self, watch: &WatchId) {
        self.watchers.remove(watch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn local_store_crud() {
        let store = MemoryLocalStore::new();
        let record = Record::from_value(json!({"code": "A"})).unwrap();

        let id = store.create("inventory", record.clone()).await.unwrap();
        let all = store.read_all("inventory").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].local_id, Some(id));

        let mut changed = all[0].clone();
        changed.set("qty", 4);
        store.update("inventory", id, changed).await.unwrap();
        assert_eq!(
            store.read_all("inventory").await.unwrap()[0].get("qty"),
            Some(&json!(4))
        );

        assert!(matches!(
            store.update("inventory", 99, record).await,
            Err(LocalError::NotFound { local_id: 99, .. })
        ));

        store.delete("inventory", id).await.unwrap();
        store.delete("inventory", id).await.unwrap();
        assert_eq!(store.count("inventory"), 0);
    }

    #[tokio::test]
    async fn remote_tree_paths() {
        let remote = MemoryRemoteStore::new();
        remote.set("pos/inventory/A", json!({"code": "A"})).await.unwrap();
        remote.set("pos/inventory/B", json!({"code": "B"})).await.unwrap();

        let collection = remote.get("pos/inventory").await.unwrap().unwrap();
        assert_eq!(collection.as_object().unwrap().len(), 2);

        remote.remove("pos/inventory/A").await.unwrap();
        remote.remove("pos/inventory/B").await.unwrap();
        remote.remove("pos/inventory/B").await.unwrap();

        assert_eq!(remote.get("pos/inventory").await.unwrap(), None);
        assert_eq!(remote.get("pos").await.unwrap(), None);
        assert_eq!(remote.write_count(), 5);
    }

    #[tokio::test]
    async fn fault_injection() {
        let remote = MemoryRemoteStore::new();

        remote.reject_path("/pos/users/x/");
        assert!(matches!(
            remote.set("pos/users/x", json!({})).await,
            Err(RemoteError::Rejected(_))
        ));
        assert!(remote.set("pos/users/y", json!({})).await.is_ok());

        remote.fail_next_writes(1);
        assert!(matches!(
            remote.set("pos/users/y", json!({})).await,
            Err(RemoteError::Unavailable(_))
        ));
        assert!(remote.set("pos/users/y", json!({})).await.is_ok());

        remote.set_offline(true);
        assert!(matches!(
            remote.get("pos/users").await,
            Err(RemoteError::Unavailable(_))
        ));
        assert_eq!(remote.write_count(), 2);
    }

    #[tokio::test]
    async fn subscribers_get_initial_and_changed_values() {
        let remote = MemoryRemoteStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let id = remote.subscribe("pos/sales", tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), None);

        remote.set("pos/sales/INV-1", json!({"total": 5})).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Some(json!({"INV-1": {"total": 5}}))
        );

        remote.set("pos/inventory/A", json!({})).await.unwrap();
        assert!(rx.try_recv().is_err());

        remote.unsubscribe(&id).await;
        remote.set("pos/sales/INV-2", json!({"total": 1})).await.unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(remote.watcher_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_subscriptions_close_their_sinks() {
        let remote = MemoryRemoteStore::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        remote.subscribe("pos/sales", tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), None);

        remote.cancel_subscriptions();
        assert_eq!(rx.recv().await, None);
        assert_eq!(remote.watcher_count(), 0);
    }

    #[tokio::test]
    async fn generated_keys_are_unique_segments() {
        let remote = MemoryRemoteStore::new();
        let a = remote.generate_key("pos/sales").await.unwrap();
        let b = remote.generate_key("pos/sales").await.unwrap();

        assert_ne!(a, b);
        assert!(!a.contains('/'));
    }
}
