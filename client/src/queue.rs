//! Durable sync queue.
//!
//! Wraps the engine's [`SyncQueue`] with an optional JSONL journal: each
//! queued item is written as a single line and fsynced immediately, so pending
//! mutations survive restarts. Removals and payload replacements rewrite the
//! journal.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tillsync_engine::{
    assign_key, CollectionName, IdentityResolver, NaturalKey, Operation, QueueItem, Record, SeqNo,
    SyncQueue,
};

/// Error type for queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Engine rejected the change.
    #[error(transparent)]
    Engine(#[from] tillsync_engine::Error),
}

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// FIFO queue of pending mutations, optionally journaled to disk.
#[derive(Debug)]
pub struct DurableQueue {
    queue: SyncQueue,
    /// Journal file, `None` for an in-memory queue.
    path: Option<PathBuf>,
}

impl DurableQueue {
    /// Create a queue that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self {
            queue: SyncQueue::new(),
            path: None,
        }
    }

    /// Create or open a journaled queue at the given path.
    ///
    /// Lines that fail to parse are skipped with a warning so one corrupt
    /// entry cannot block the rest of the queue.
    pub fn open(path: &Path) -> QueueResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(path)?;

        let reader = BufReader::new(File::open(path)?);
        let mut items = Vec::new();

        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<QueueItem>(&line) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(
                    path = %path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping unreadable queue entry"
                ),
            }
        }

        tracing::debug!(path = %path.display(), pending = items.len(), "Queue journal opened");

        Ok(Self {
            queue: SyncQueue::restore(items),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open the journal at `path`, or an in-memory queue when `None`.
    pub fn open_optional(path: Option<&Path>) -> QueueResult<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Ok(Self::in_memory()),
        }
    }

    /// Append a mutation; it is on disk before this returns.
    pub fn enqueue(
        &mut self,
        collection: impl Into<CollectionName>,
        operation: Operation,
        payload: Record,
    ) -> QueueResult<QueueItem> {
        let item = self
            .queue
            .enqueue(collection, operation, payload, Utc::now())
            .clone();

        if let Some(path) = &self.path {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            let json = serde_json::to_string(&item)?;
            writeln!(file, "{}", json)?;
            file.sync_all()?;
        }

        Ok(item)
    }

    /// All pending items in enqueue order.
    pub fn items(&self) -> &[QueueItem] {
        self.queue.items()
    }

    /// Get a pending item by sequence number.
    pub fn get(&self, seq: SeqNo) -> Option<&QueueItem> {
        self.queue.get(seq)
    }

    /// Remove a delivered item.
    pub fn remove(&mut self, seq: SeqNo) -> QueueResult<Option<QueueItem>> {
        let removed = self.queue.remove(seq);
        if removed.is_some() {
            self.rewrite()?;
        }
        Ok(removed)
    }

    /// Replace an item's payload, keeping its position.
    pub fn replace_payload(&mut self, seq: SeqNo, payload: Record) -> QueueResult<()> {
        self.queue.replace_payload(seq, payload)?;
        self.rewrite()
    }

    /// Write a synthesized key onto an item's payload.
    ///
    /// Later items for the same local record that carry no key of their own
    /// get it too, so an update queued before the create was delivered still
    /// resolves. Returns the item's new payload.
    pub fn stamp_key(
        &mut self,
        item: &QueueItem,
        key: &str,
        resolver: &IdentityResolver<'_>,
    ) -> QueueResult<Record> {
        let mut payload = item.payload.clone();
        assign_key(&mut payload, key);
        self.queue.replace_payload(item.seq, payload.clone())?;

        let followers: Vec<(SeqNo, Record)> = self
            .queue
            .items()
            .iter()
            .filter(|other| other.seq > item.seq && self.same_record(item, other))
            .filter(|other| matches!(resolver.derive(&other.collection, &other.payload), Ok(None)))
            .map(|other| {
                let mut payload = other.payload.clone();
                assign_key(&mut payload, key);
                (other.seq, payload)
            })
            .collect();

        for (seq, payload) in followers {
            self.queue.replace_payload(seq, payload)?;
        }
        self.rewrite()?;

        Ok(payload)
    }

    /// Check if a later item touches the same local record as `item`.
    pub fn has_later_change(&self, item: &QueueItem) -> bool {
        self.queue
            .items()
            .iter()
            .any(|other| other.seq > item.seq && self.same_record(item, other))
    }

    fn same_record(&self, item: &QueueItem, other: &QueueItem) -> bool {
        item.payload.local_id.is_some()
            && other.collection == item.collection
            && other.payload.local_id == item.payload.local_id
    }

    /// Keys with a delete still pending in `collection`.
    pub fn pending_delete_keys(
        &self,
        resolver: &IdentityResolver<'_>,
        collection: &str,
    ) -> HashSet<NaturalKey> {
        self.queue.pending_delete_keys(resolver, collection)
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if the queue is journaled.
    pub fn is_durable(&self) -> bool {
        self.path.is_some()
    }

    /// Rewrite the journal from the in-memory queue.
    ///
    /// Written to a sibling file and renamed over the journal so a crash
    /// leaves either the old or the new contents.
    fn rewrite(&self) -> QueueResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let tmp = path.with_extension("jsonl.tmp");
        {
            let mut file = File::create(&tmp)?;
            for item in self.queue.items() {
                let json = serde_json::to_string(item)?;
                writeln!(file, "{}", json)?;
            }
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use tillsync_engine::SyncSchema;

    fn record(value: serde_json::Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn journal(dir: &TempDir) -> PathBuf {
        dir.path().join("sync").join("queue.jsonl")
    }

    #[test]
    fn in_memory_queue() {
        let mut queue = DurableQueue::in_memory();
        assert!(!queue.is_durable());

        let item = queue
            .enqueue("sales", Operation::Create, record(json!({"total": 5})))
            .unwrap();
        assert_eq!(item.seq, 1);
        assert_eq!(queue.len(), 1);

        assert!(queue.remove(1).unwrap().is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = journal(&dir);

        {
            let mut queue = DurableQueue::open(&path).unwrap();
            queue
                .enqueue("inventory", Operation::Create, record(json!({"code": "A"})))
                .unwrap();
            queue
                .enqueue("inventory", Operation::Delete, record(json!({"code": "B"})))
                .unwrap();
        }

        let mut reopened = DurableQueue::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.items()[0].operation, Operation::Create);
        assert_eq!(reopened.items()[1].payload.get("code"), Some(&json!("B")));

        let next = reopened
            .enqueue("sales", Operation::Update, record(json!({})))
            .unwrap();
        assert_eq!(next.seq, 3);
    }

    #[test]
    fn removal_and_replacement_are_persisted() {
        let dir = TempDir::new().unwrap();
        let path = journal(&dir);

        {
            let mut queue = DurableQueue::open(&path).unwrap();
            for total in [1, 2, 3] {
                queue
                    .enqueue("sales", Operation::Create, record(json!({"total": total})))
                    .unwrap();
            }
            queue.remove(1).unwrap();
            queue
                .replace_payload(3, record(json!({"total": 3, "id": "k3"})))
                .unwrap();
        }

        let reopened = DurableQueue::open(&path).unwrap();
        let seqs: Vec<_> = reopened.items().iter().map(|i| i.seq).collect();
        assert_eq!(seqs, [2, 3]);
        assert_eq!(reopened.get(3).unwrap().payload.get("id"), Some(&json!("k3")));
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = journal(&dir);

        {
            let mut queue = DurableQueue::open(&path).unwrap();
            queue
                .enqueue("grn", Operation::Create, record(json!({"grnNumber": "G-1"})))
                .unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();

        let reopened = DurableQueue::open(&path).unwrap();
        assert_eq!(reopened.len(), 1);
    }

    #[test]
    fn replace_unknown_item_fails() {
        let mut queue = DurableQueue::in_memory();
        let result = queue.replace_payload(42, Record::default());
        assert!(matches!(
            result,
            Err(QueueError::Engine(tillsync_engine::Error::ItemNotFound(42)))
        ));
    }

    #[test]
    fn later_changes_to_the_same_record() {
        let mut queue = DurableQueue::in_memory();
        let first = queue
            .enqueue("inventory", Operation::Create, record(json!({"code": "A"})).with_local_id(1))
            .unwrap();
        let other = queue
            .enqueue("inventory", Operation::Create, record(json!({"code": "B"})).with_local_id(2))
            .unwrap();
        assert!(!queue.has_later_change(&first));

        queue
            .enqueue("inventory", Operation::Update, record(json!({"code": "A"})).with_local_id(1))
            .unwrap();
        assert!(queue.has_later_change(&first));
        assert!(!queue.has_later_change(&other));
    }

    #[test]
    fn stamped_key_reaches_later_keyless_items() {
        let schema = SyncSchema::point_of_sale("pos");
        let resolver = IdentityResolver::new(&schema);

        let mut queue = DurableQueue::in_memory();
        let create = queue
            .enqueue("sales", Operation::Create, record(json!({"total": 1})).with_local_id(4))
            .unwrap();
        queue
            .enqueue("sales", Operation::Update, record(json!({"total": 2})).with_local_id(4))
            .unwrap();
        queue
            .enqueue("sales", Operation::Update, record(json!({"total": 3})).with_local_id(5))
            .unwrap();

        let payload = queue.stamp_key(&create, "-Nk1", &resolver).unwrap();

        assert_eq!(payload.get("id"), Some(&json!("-Nk1")));
        assert_eq!(queue.get(1).unwrap().payload.get("id"), Some(&json!("-Nk1")));
        assert_eq!(queue.get(2).unwrap().payload.get("id"), Some(&json!("-Nk1")));
        assert_eq!(queue.get(3).unwrap().payload.get("id"), None);
    }

    #[test]
    fn pending_deletes() {
        let schema = SyncSchema::point_of_sale("pos");
        let resolver = IdentityResolver::new(&schema);

        let mut queue = DurableQueue::in_memory();
        queue
            .enqueue("customers", Operation::Delete, record(json!({"customerId": "C-1"})))
            .unwrap();

        let keys = queue.pending_delete_keys(&resolver, "customers");
        assert!(keys.contains("C-1"));
    }
}
