//! Queue items describing pending mutations.
//!
//! Changes are expressed as queued operations, not direct remote writes.
//! This keeps the local store authoritative while offline and lets the
//! processor deliver mutations later, in order.

use crate::{CollectionName, Record, SeqNo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of mutations a queue item can carry.
///
/// There is no partial patch: updates ship the full record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    /// Lowercase name, as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Only creates may ask the remote for a fresh key.
    pub fn may_synthesize_key(&self) -> bool {
        matches!(self, Operation::Create)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending mutation awaiting delivery to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    /// Position in the queue, assigned on enqueue
    pub seq: SeqNo,
    /// Target collection
    pub collection: CollectionName,
    /// Mutation kind
    pub operation: Operation,
    /// Full record as it was when the mutation happened
    pub payload: Record,
    /// When the mutation was queued
    pub enqueued_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a new queue item.
    pub fn new(
        seq: SeqNo,
        collection: impl Into<CollectionName>,
        operation: Operation,
        payload: Record,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            seq,
            collection: collection.into(),
            operation,
            payload,
            enqueued_at,
        }
    }
}
