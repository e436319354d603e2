//! Per-collection critical sections.
//!
//! Bulk replaces (download merges, listener pushes) and the processor's local
//! flag updates on the same collection are serialized, so a merge cannot
//! bring back a record in the middle of its deletion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tillsync_engine::CollectionName;

/// One async mutex per collection, created on first use.
#[derive(Debug, Default)]
pub struct CollectionLocks {
    locks: DashMap<CollectionName, Arc<Mutex<()>>>,
}

impl CollectionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a collection.
    pub async fn lock(&self, collection: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self
            .locks
            .entry(collection.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}
