//! Error taxonomy of the sync engine.

use std::time::Duration;

use tillsync_engine::{CollectionName, LocalId, Operation, SeqNo};

use crate::queue::QueueError;

/// Failure reported by a [`RemoteStore`](crate::RemoteStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The remote could not be reached.
    #[error("remote unreachable: {0}")]
    Unavailable(String),

    /// The remote refused the request (rules, validation, bad path).
    #[error("remote rejected the request: {0}")]
    Rejected(String),
}

/// Failure reported by a [`LocalStore`](crate::LocalStore).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocalError {
    #[error("record {local_id} not found in '{collection}'")]
    NotFound {
        collection: CollectionName,
        local_id: LocalId,
    },

    #[error("local store failure: {0}")]
    Backend(String),
}

/// Sync engine error type.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("missing identity for {operation} on '{collection}' (fields: [{fields}])")]
    MissingIdentity {
        collection: CollectionName,
        operation: Operation,
        fields: String,
    },

    #[error("remote rejected write: {0}")]
    RemoteRejected(String),

    #[error("download failed for collections: {}", failed.join(", "))]
    DownloadPartialFailure { failed: Vec<CollectionName> },

    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// An earlier change to the same record failed in this drain.
    #[error("held back behind failed queue item {0} for the same record")]
    Blocked(SeqNo),

    #[error("local store error: {0}")]
    Local(#[from] LocalError),

    #[error("engine error: {0}")]
    Engine(tillsync_engine::Error),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl SyncError {
    /// Check if the failure is a connectivity problem worth retrying later.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::NetworkUnavailable(_) | SyncError::Timeout(_))
    }
}

impl From<tillsync_engine::Error> for SyncError {
    fn from(error: tillsync_engine::Error) -> Self {
        match error {
            tillsync_engine::Error::MissingIdentity {
                collection,
                operation,
                fields,
            } => SyncError::MissingIdentity {
                collection,
                operation,
                fields,
            },
            other => SyncError::Engine(other),
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(error: RemoteError) -> Self {
        match error {
            RemoteError::Unavailable(msg) => SyncError::NetworkUnavailable(msg),
            RemoteError::Rejected(msg) => SyncError::RemoteRejected(msg),
        }
    }
}

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
