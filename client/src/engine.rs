//! The sync engine facade.
//!
//! [`SyncEngine`] owns the stores, the queue and the listener registry of one
//! device. The application writes through it; it journals every write,
//! delivers the queue when online, and downloads and merges every collection
//! whenever connectivity returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use tillsync_engine::{
    assign_key, CollectionName, Fields, IdentityResolver, NaturalKey, Operation, Record,
    SyncSchema,
};

use crate::config::SyncConfig;
use crate::downloader::{CollectionDownloader, DownloadReport};
use crate::error::{Result, SyncError};
use crate::listeners::{ListenerCallback, ListenerRegistry, Subscription};
use crate::locks::CollectionLocks;
use crate::merger::{CollectionMerger, MergeSummary};
use crate::processor::{DrainResult, SyncQueueProcessor};
use crate::queue::DurableQueue;
use crate::store::{LocalStore, RemoteStore};

/// Outcome of a download-merge-drain cycle.
#[derive(Debug, Default)]
pub struct ResyncReport {
    /// Collections merged, in schema order
    pub merged: Vec<MergeSummary>,
    /// Collections that could not be downloaded or merged
    pub failed: Vec<(CollectionName, SyncError)>,
    /// Queue delivery after the merge; `None` if the engine went offline
    pub drain: Option<DrainResult>,
}

impl ResyncReport {
    /// The aggregate error describing which collections failed, if any.
    pub fn partial_failure(&self) -> Option<SyncError> {
        (!self.failed.is_empty()).then(|| SyncError::DownloadPartialFailure {
            failed: self.failed.iter().map(|(name, _)| name.clone()).collect(),
        })
    }
}

/// Offline-first sync engine for one device.
pub struct SyncEngine {
    config: Arc<SyncConfig>,
    schema: Arc<SyncSchema>,
    local: Arc<dyn LocalStore>,
    queue: Arc<Mutex<DurableQueue>>,
    locks: Arc<CollectionLocks>,
    processor: SyncQueueProcessor,
    downloader: CollectionDownloader,
    merger: CollectionMerger,
    listeners: ListenerRegistry,
    online: AtomicBool,
}

impl SyncEngine {
    /// Build an engine, opening the queue journal named by the config.
    ///
    /// The engine starts offline; call [`SyncEngine::start`] or
    /// [`SyncEngine::set_online`] to begin syncing.
    pub fn new(
        config: SyncConfig,
        schema: SyncSchema,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        let queue = DurableQueue::open_optional(config.queue_path.as_deref())?;
        Ok(Self::with_queue(config, schema, local, remote, queue))
    }

    /// Build an engine around an already opened queue.
    pub fn with_queue(
        config: SyncConfig,
        schema: SyncSchema,
        local: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteStore>,
        queue: DurableQueue,
    ) -> Self {
        let config = Arc::new(config);
        let schema = Arc::new(schema);
        let queue = Arc::new(Mutex::new(queue));
        let locks = Arc::new(CollectionLocks::new());

        let processor = SyncQueueProcessor::new(
            schema.clone(),
            config.clone(),
            local.clone(),
            remote.clone(),
            queue.clone(),
            locks.clone(),
        );
        let downloader =
            CollectionDownloader::new(schema.clone(), remote.clone(), config.remote_timeout);
        let merger = CollectionMerger::new(
            schema.clone(),
            config.clone(),
            local.clone(),
            remote.clone(),
            queue.clone(),
            locks.clone(),
        );
        let listeners = ListenerRegistry::with_merger(
            schema.clone(),
            remote,
            config.remote_timeout,
            merger.clone(),
        );

        Self {
            config,
            schema,
            local,
            queue,
            locks,
            processor,
            downloader,
            merger,
            listeners,
            online: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn schema(&self) -> &SyncSchema {
        &self.schema
    }

    /// Create a record locally and queue its remote creation.
    pub async fn create(&self, collection: &str, fields: Fields) -> Result<Record> {
        self.schema.collection(collection)?;
        let mut record = Record::new(fields);

        let _guard = self.locks.lock(collection).await;
        let local_id = self.local.create(collection, record.clone()).await?;
        record.local_id = Some(local_id);

        self.queue
            .lock()
            .await
            .enqueue(collection, Operation::Create, record.clone())?;

        tracing::debug!(collection = %collection, local_id, "Record created");
        Ok(record)
    }

    /// Save a changed record locally and queue a full remote overwrite.
    pub async fn update(&self, collection: &str, record: Record) -> Result<Record> {
        self.schema.collection(collection)?;
        let local_id = record.local_id.ok_or_else(|| {
            tillsync_engine::Error::InvalidRecord(format!(
                "update on '{}' needs a localId",
                collection
            ))
        })?;

        let mut record = self.keyed(collection, record)?;
        record.synced = false;

        let _guard = self.locks.lock(collection).await;
        self.local
            .update(collection, local_id, record.clone())
            .await?;
        self.queue
            .lock()
            .await
            .enqueue(collection, Operation::Update, record.clone())?;

        tracing::debug!(collection = %collection, local_id, "Record updated");
        Ok(record)
    }

    /// Delete a record locally and queue its remote removal.
    pub async fn delete(&self, collection: &str, record: Record) -> Result<()> {
        self.schema.collection(collection)?;
        let record = self.keyed(collection, record)?;

        let _guard = self.locks.lock(collection).await;
        if let Some(local_id) = record.local_id {
            self.local.delete(collection, local_id).await?;
        }
        self.queue
            .lock()
            .await
            .enqueue(collection, Operation::Delete, record)?;

        tracing::debug!(collection = %collection, "Record deleted");
        Ok(())
    }

    /// Carry a downloaded record's remote key into its fields when none of
    /// the collection's candidates are populated.
    fn keyed(&self, collection: &str, mut record: Record) -> Result<Record> {
        let resolver = IdentityResolver::new(&self.schema);
        if resolver.derive(collection, &record)?.is_none() {
            if let Some(key) = record.firebase_id.clone() {
                assign_key(&mut record, &key);
            }
        }
        Ok(record)
    }

    /// Deliver the queue.
    ///
    /// Fails with [`SyncError::NetworkUnavailable`] while offline; queued
    /// items wait for the next drain.
    pub async fn drain(&self) -> Result<DrainResult> {
        if !self.is_online() {
            return Err(SyncError::NetworkUnavailable("engine is offline".into()));
        }
        Ok(self.processor.drain().await)
    }

    /// Download every known collection.
    pub async fn download_all(&self) -> DownloadReport {
        self.downloader
            .download_all(&self.schema.collection_names())
            .await
    }

    /// Download and merge every collection, then drain the queue.
    pub async fn resync(&self) -> ResyncReport {
        let download = self.download_all().await;
        let mut report = ResyncReport {
            failed: download.failed,
            ..Default::default()
        };

        for (collection, records) in download.collections {
            if report.failed.iter().any(|(name, _)| *name == collection) {
                continue;
            }
            match self.merger.merge(&collection, records).await {
                Ok(summary) => report.merged.push(summary),
                Err(error) => {
                    tracing::warn!(collection = %collection, error = %error, "Collection merge failed");
                    report.failed.push((collection, error));
                }
            }
        }

        if self.is_online() {
            report.drain = Some(self.processor.drain().await);
        }

        tracing::info!(
            merged = report.merged.len(),
            failed = report.failed.len(),
            "Resync finished"
        );

        report
    }

    /// Write one record to the remote right away, bypassing the queue.
    ///
    /// Errors propagate to the caller. A record without a key gets one
    /// synthesized, which is saved back onto the local record.
    pub async fn push_now(&self, collection: &str, record: Record) -> Result<NaturalKey> {
        let mut record = self.keyed(collection, record)?;
        let resolver = IdentityResolver::new(&self.schema);

        let key = match resolver.derive(collection, &record)? {
            Some(key) => key,
            None => {
                let key = self.processor.synthesize_key(collection).await?;
                assign_key(&mut record, &key);
                key
            }
        };

        self.processor.write(collection, &record, &key).await?;

        if let Some(local_id) = record.local_id {
            let _guard = self.locks.lock(collection).await;
            self.processor
                .patch_synced(collection, local_id, &key)
                .await?;
        }

        tracing::debug!(collection = %collection, key = %key, "Record pushed");
        Ok(key)
    }

    /// Listen to a remote collection.
    ///
    /// Every snapshot is merged into the local store before `callback` runs
    /// with the collection's remote records.
    pub async fn watch(&self, collection: &str, callback: ListenerCallback) -> Result<Subscription> {
        self.listeners.subscribe(collection, callback).await
    }

    /// The engine's listener registry.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Record a connectivity change.
    ///
    /// Going online runs a full [`resync`](Self::resync) and returns its
    /// report; any other call returns `None`.
    pub async fn set_online(&self, online: bool) -> Option<ResyncReport> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        match (was_online, online) {
            (false, true) => {
                tracing::info!("Connectivity restored");
                Some(self.resync().await)
            }
            (true, false) => {
                tracing::info!("Connectivity lost, drains suspended");
                None
            }
            _ => None,
        }
    }

    /// Go online and run the startup download-merge-drain cycle.
    pub async fn start(&self) -> ResyncReport {
        self.online.store(true, Ordering::SeqCst);
        self.resync().await
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Follow a connectivity signal until its sender is dropped.
    pub fn spawn_connectivity_loop(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let online = *connectivity.borrow_and_update();
                if let Some(report) = self.set_online(online).await {
                    if let Some(error) = report.partial_failure() {
                        tracing::warn!(error = %error, "Resync incomplete");
                    }
                }
                if connectivity.changed().await.is_err() {
                    break;
                }
            }
            tracing::debug!("Connectivity loop stopped");
        })
    }

    /// Number of queued mutations.
    pub async fn pending_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Tear down every listener and stop syncing.
    pub async fn shutdown(&self) {
        let removed = self.listeners.cleanup_all().await;
        self.online.store(false, Ordering::SeqCst);
        tracing::info!(listeners = removed, "Sync engine shut down");
    }
}
