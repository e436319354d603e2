//! Applying downloaded collections to the local store.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;

use tillsync_engine::{
    plan_merge, CollectionName, CollectionPath, DuplicateReconciler, IdentityResolver,
    NaturalKey, ReconcileOutcome, Record, SyncSchema,
};

use crate::config::SyncConfig;
use crate::error::Result;
use crate::locks::CollectionLocks;
use crate::queue::DurableQueue;
use crate::store::{with_deadline, LocalStore, RemoteStore};

/// What a merge changed in one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub collection: CollectionName,
    /// Downloaded records created locally
    pub inserted: usize,
    /// Synced local records deleted as stale or superseded
    pub removed: usize,
    /// Downloaded records held back by pending local work
    pub skipped: usize,
    /// Synced local records already matching the remote
    pub unchanged: usize,
    /// Local records removed as duplicates afterwards
    pub duplicates: usize,
}

/// Replaces the synced part of a local collection with a remote snapshot,
/// then removes duplicates.
#[derive(Clone)]
pub struct CollectionMerger {
    schema: Arc<SyncSchema>,
    config: Arc<SyncConfig>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<Mutex<DurableQueue>>,
    locks: Arc<CollectionLocks>,
}

impl CollectionMerger {
    pub fn new(
        schema: Arc<SyncSchema>,
        config: Arc<SyncConfig>,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        queue: Arc<Mutex<DurableQueue>>,
        locks: Arc<CollectionLocks>,
    ) -> Self {
        Self {
            schema,
            config,
            local,
            remote,
            queue,
            locks,
        }
    }

    /// Merge `downloaded` into the local copy of `collection`.
    pub async fn merge(&self, collection: &str, downloaded: Vec<Record>) -> Result<MergeSummary> {
        let _guard = self.locks.lock(collection).await;
        let resolver = IdentityResolver::new(&self.schema);

        let local = self.local.read_all(collection).await?;
        let pending_deletes = self
            .queue
            .lock()
            .await
            .pending_delete_keys(&resolver, collection);
        let plan = plan_merge(&resolver, collection, &local, downloaded, &pending_deletes)?;

        let mut summary = MergeSummary {
            collection: collection.to_string(),
            inserted: plan.insert.len(),
            removed: plan.remove.len(),
            skipped: plan.skipped.len(),
            unchanged: plan.unchanged,
            duplicates: 0,
        };

        for local_id in plan.remove {
            self.local.delete(collection, local_id).await?;
        }
        for record in plan.insert {
            self.local.create(collection, record).await?;
        }

        summary.duplicates = self.remove_duplicates(collection, &resolver).await?;

        tracing::debug!(
            collection = %collection,
            inserted = summary.inserted,
            removed = summary.removed,
            skipped = summary.skipped,
            duplicates = summary.duplicates,
            "Collection merged"
        );

        Ok(summary)
    }

    /// Run the collection's dedup rules over the local store.
    ///
    /// Callers hold the collection lock.
    async fn remove_duplicates(
        &self,
        collection: &str,
        resolver: &IdentityResolver<'_>,
    ) -> Result<usize> {
        let reconciler = DuplicateReconciler::for_collection(&self.schema, collection)?;
        if !reconciler.has_rules() {
            return Ok(0);
        }

        let outcome = reconciler.reconcile(self.local.read_all(collection).await?);
        for record in &outcome.removed {
            if let Some(local_id) = record.local_id {
                self.local.delete(collection, local_id).await?;
            }
        }

        if self.config.dedup_remote && !outcome.removed.is_empty() {
            self.remove_remote_duplicates(collection, resolver, &outcome)
                .await;
        }

        Ok(outcome.removed.len())
    }

    /// Delete removed duplicates remotely.
    ///
    /// A key still used by a surviving record is left alone. Failures are
    /// logged; the next merge finds the same duplicates again.
    async fn remove_remote_duplicates(
        &self,
        collection: &str,
        resolver: &IdentityResolver<'_>,
        outcome: &ReconcileOutcome,
    ) {
        let key_of = |record: &Record| -> Option<NaturalKey> {
            record
                .firebase_id
                .clone()
                .or_else(|| resolver.derive(collection, record).ok().flatten())
        };
        let kept: HashSet<NaturalKey> = outcome.unique.iter().filter_map(key_of).collect();
        let doomed: HashSet<NaturalKey> = outcome
            .removed
            .iter()
            .filter_map(key_of)
            .filter(|key| !kept.contains(key))
            .collect();

        let path = CollectionPath::of(&self.schema, collection);
        for key in doomed {
            let result = with_deadline(
                self.config.remote_timeout,
                self.remote.remove(&path.record(&key)),
            )
            .await;
            if let Err(error) = result {
                tracing::warn!(collection = %collection, key = %key, error = %error, "Failed to remove remote duplicate");
            }
        }
    }
}
