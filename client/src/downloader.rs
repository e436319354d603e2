//! Whole-collection downloads.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use tillsync_engine::{materialize, CollectionName, CollectionPath, Record, SyncSchema};

use crate::error::{Result, SyncError};
use crate::store::{with_deadline, RemoteStore};

/// Result of downloading several collections.
///
/// Failed collections are listed in `failed` and appear in `collections` with
/// no records, so callers can proceed with what did arrive.
#[derive(Debug, Default)]
pub struct DownloadReport {
    /// Downloaded records per collection, in request order
    pub collections: Vec<(CollectionName, Vec<Record>)>,
    /// Collections whose download failed, with the reason
    pub failed: Vec<(CollectionName, SyncError)>,
}

impl DownloadReport {
    /// Records downloaded for a collection; empty if it failed or is unknown.
    pub fn records(&self, collection: &str) -> &[Record] {
        self.collections
            .iter()
            .find(|(name, _)| name == collection)
            .map_or(&[], |(_, records)| records.as_slice())
    }

    /// Check if a collection's download failed.
    pub fn has_failed(&self, collection: &str) -> bool {
        self.failed.iter().any(|(name, _)| name == collection)
    }

    /// Check if every collection arrived.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// The aggregate error describing which collections failed, if any.
    pub fn partial_failure(&self) -> Option<SyncError> {
        (!self.failed.is_empty()).then(|| SyncError::DownloadPartialFailure {
            failed: self.failed.iter().map(|(name, _)| name.clone()).collect(),
        })
    }
}

/// Pulls remote collections and materializes them as local-shaped records.
#[derive(Clone)]
pub struct CollectionDownloader {
    schema: Arc<SyncSchema>,
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
}

impl CollectionDownloader {
    pub fn new(schema: Arc<SyncSchema>, remote: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self {
            schema,
            remote,
            timeout,
        }
    }

    /// Download one collection.
    ///
    /// An absent remote collection is empty, not an error.
    pub async fn download(&self, collection: &str) -> Result<Vec<Record>> {
        self.schema.collection(collection)?;
        let path = CollectionPath::of(&self.schema, collection);

        let snapshot = with_deadline(self.timeout, self.remote.get(&path.to_string())).await?;
        let records = materialize(snapshot.as_ref());

        tracing::debug!(collection = %collection, records = records.len(), "Collection downloaded");
        Ok(records)
    }

    /// Download several collections concurrently, isolating failures.
    pub async fn download_all(&self, collections: &[CollectionName]) -> DownloadReport {
        let results = join_all(collections.iter().map(|c| self.download(c))).await;
        let mut report = DownloadReport::default();

        for (collection, result) in collections.iter().zip(results) {
            match result {
                Ok(records) => report.collections.push((collection.clone(), records)),
                Err(error) => {
                    tracing::warn!(collection = %collection, error = %error, "Collection download failed");
                    report.collections.push((collection.clone(), Vec::new()));
                    report.failed.push((collection.clone(), error));
                }
            }
        }

        report
    }
}
