//! Sequential delivery of queued mutations.
//!
//! A drain walks the items queued when it started, in enqueue order, one at a
//! time. Each item either reaches the remote and leaves the queue, or is
//! reported as failed and stays queued for the next drain. Once a change to a
//! record fails, the later changes to that record are held back for the rest
//! of the drain so the remote never sees them out of order. There is no retry
//! loop here; drains are triggered from outside.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use tillsync_engine::{
    assign_key, remote_payload, validate_key, CollectionName, CollectionPath, IdentityResolver,
    LocalId, NaturalKey, Operation, QueueItem, Record, Resolution, SeqNo, SyncSchema,
};

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::locks::CollectionLocks;
use crate::queue::DurableQueue;
use crate::store::{find_local, with_deadline, LocalStore, RemoteStore};

/// One item that could not be delivered.
#[derive(Debug)]
pub struct DrainFailure {
    /// Sequence number of the item, still queued
    pub seq: SeqNo,
    pub collection: CollectionName,
    pub operation: Operation,
    pub error: SyncError,
}

/// Outcome of one drain.
#[derive(Debug, Default)]
pub struct DrainResult {
    /// Items delivered and removed from the queue
    pub processed: usize,
    /// Items that failed, in queue order
    pub failed: Vec<DrainFailure>,
}

impl DrainResult {
    /// Check if every attempted item was delivered.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// A way of recognizing queue items that change the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RecordRef {
    Local(CollectionName, LocalId),
    Key(CollectionName, NaturalKey),
}

/// Drains the [`DurableQueue`] into the remote store.
pub struct SyncQueueProcessor {
    schema: Arc<SyncSchema>,
    config: Arc<SyncConfig>,
    local: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<Mutex<DurableQueue>>,
    locks: Arc<CollectionLocks>,
    /// Only one drain runs at a time.
    draining: Mutex<()>,
}

impl SyncQueueProcessor {
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
            draining: Mutex::new(()),
        }
    }

    /// Deliver every item queued at the time of the call.
    pub async fn drain(&self) -> DrainResult {
        let _draining = self.draining.lock().await;
        let items = self.queue.lock().await.items().to_vec();
        let mut result = DrainResult::default();

        if items.is_empty() {
            return result;
        }

        tracing::debug!(pending = items.len(), "Draining sync queue");

        // Record -> sequence number of its first failed item.
        let mut blocked: HashMap<RecordRef, SeqNo> = HashMap::new();

        for item in items {
            let refs = self.record_refs(&item);
            let held_by = refs.iter().find_map(|r| blocked.get(r).copied());
            if let Some(first) = held_by {
                tracing::debug!(
                    seq = item.seq,
                    behind = first,
                    collection = %item.collection,
                    "Queue item held back"
                );
                for r in refs {
                    blocked.entry(r).or_insert(first);
                }
                result.failed.push(DrainFailure {
                    seq: item.seq,
                    collection: item.collection.clone(),
                    operation: item.operation,
                    error: SyncError::Blocked(first),
                });
                continue;
            }

            match self.deliver(&item).await {
                Ok(key) => {
                    if let Err(e) = self.queue.lock().await.remove(item.seq) {
                        // Delivered; a stale journal only means one redelivery.
                        tracing::warn!(seq = item.seq, error = %e, "Failed to persist queue removal");
                    }
                    tracing::debug!(
                        seq = item.seq,
                        collection = %item.collection,
                        operation = %item.operation,
                        key = %key,
                        "Queue item delivered"
                    );
                    result.processed += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        seq = item.seq,
                        collection = %item.collection,
                        operation = %item.operation,
                        error = %error,
                        "Queue item failed"
                    );
                    for r in refs {
                        blocked.entry(r).or_insert(item.seq);
                    }
                    result.failed.push(DrainFailure {
                        seq: item.seq,
                        collection: item.collection.clone(),
                        operation: item.operation,
                        error,
                    });
                }
            }
        }

        tracing::info!(
            processed = result.processed,
            failed = result.failed.len(),
            "Sync queue drained"
        );

        result
    }

    /// Every way `item` identifies its record.
    fn record_refs(&self, item: &QueueItem) -> Vec<RecordRef> {
        let mut refs = Vec::with_capacity(2);
        if let Some(local_id) = item.payload.local_id {
            refs.push(RecordRef::Local(item.collection.clone(), local_id));
        }
        let resolver = IdentityResolver::new(&self.schema);
        if let Ok(Some(key)) = resolver.derive(&item.collection, &item.payload) {
            refs.push(RecordRef::Key(item.collection.clone(), key));
        }
        refs
    }

    /// Deliver one item, returning the key it was written under.
    async fn deliver(&self, item: &QueueItem) -> Result<NaturalKey> {
        let resolver = IdentityResolver::new(&self.schema);
        let mut payload = item.payload.clone();

        let key = match resolver.resolve(item)? {
            Resolution::Derived(key) => key,
            Resolution::Synthesize => {
                let key = self.synthesize_key(&item.collection).await?;
                // Persist before the remote write so a redelivery reuses the key.
                payload = self.queue.lock().await.stamp_key(item, &key, &resolver)?;
                self.record_key(&item.collection, &payload, &key).await?;
                key
            }
        };

        match item.operation {
            Operation::Create | Operation::Update => {
                self.write(&item.collection, &payload, &key).await?;
                self.mark_synced(item, &key).await?;
            }
            Operation::Delete => {
                let path = CollectionPath::of(&self.schema, &item.collection);
                with_deadline(
                    self.config.remote_timeout,
                    self.remote.remove(&path.record(&key)),
                )
                .await?;
            }
        }

        Ok(key)
    }

    /// Ask the remote for a fresh key under a collection.
    pub(crate) async fn synthesize_key(&self, collection: &str) -> Result<NaturalKey> {
        let path = CollectionPath::of(&self.schema, collection);
        let key = with_deadline(
            self.config.remote_timeout,
            self.remote.generate_key(&path.to_string()),
        )
        .await?;
        Ok(validate_key(key)?)
    }

    /// Overwrite the remote copy of a record.
    pub(crate) async fn write(&self, collection: &str, record: &Record, key: &str) -> Result<()> {
        let path = CollectionPath::of(&self.schema, collection);
        let body = remote_payload(record, key, &self.config.actor, Utc::now());
        with_deadline(
            self.config.remote_timeout,
            self.remote.set(&path.record(key), body),
        )
        .await
    }

    /// Write a synthesized key onto the local record.
    async fn record_key(&self, collection: &str, payload: &Record, key: &str) -> Result<()> {
        let Some(local_id) = payload.local_id else {
            return Ok(());
        };
        let _guard = self.locks.lock(collection).await;

        if let Some(mut record) = find_local(self.local.as_ref(), collection, local_id).await? {
            assign_key(&mut record, key);
            self.local.update(collection, local_id, record).await?;
        }
        Ok(())
    }

    /// Flag the local record as synced after a successful write.
    ///
    /// Skipped when the record is gone or has a newer change still queued.
    async fn mark_synced(&self, item: &QueueItem, key: &str) -> Result<()> {
        let Some(local_id) = item.payload.local_id else {
            return Ok(());
        };
        let _guard = self.locks.lock(&item.collection).await;

        if self.queue.lock().await.has_later_change(item) {
            return Ok(());
        }
        self.patch_synced(&item.collection, local_id, key).await
    }

    /// Set `synced = true` and `id = key` on a local record.
    ///
    /// Callers hold the collection lock.
    pub(crate) async fn patch_synced(
        &self,
        collection: &str,
        local_id: LocalId,
        key: &str,
    ) -> Result<()> {
        if let Some(mut record) = find_local(self.local.as_ref(), collection, local_id).await? {
            record.synced = true;
            assign_key(&mut record, key);
            self.local.update(collection, local_id, record).await?;
        }
        Ok(())
    }
}
