//! The ordered list of pending mutations.
//!
//! The queue itself is in-memory; durability is the caller's concern (the
//! client crate journals every change). Sequence numbers are assigned on
//! enqueue and never reused within one queue, so items stay addressable after
//! earlier ones are removed.

use crate::{
    error::Result, CollectionName, Error, IdentityResolver, NaturalKey, Operation, QueueItem,
    Record, SeqNo,
};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// FIFO queue of [`QueueItem`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncQueue {
    next_seq: SeqNo,
    items: Vec<QueueItem>,
}

impl SyncQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            items: Vec::new(),
        }
    }

    /// Rebuild a queue from persisted items.
    ///
    /// Items are ordered by sequence number; numbering continues after the
    /// highest one seen.
    pub fn restore(mut items: Vec<QueueItem>) -> Self {
        items.sort_by_key(|item| item.seq);
        let next_seq = items.last().map_or(1, |item| item.seq + 1);
        Self { next_seq, items }
    }

    /// Append a mutation and return the queued item.
    pub fn enqueue(
        &mut self,
        collection: impl Into<CollectionName>,
        operation: Operation,
        payload: Record,
        enqueued_at: DateTime<Utc>,
    ) -> &QueueItem {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items
            .push(QueueItem::new(seq, collection, operation, payload, enqueued_at));
        &self.items[self.items.len() - 1]
    }

    /// All items in enqueue order.
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    /// Get an item by sequence number.
    pub fn get(&self, seq: SeqNo) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.seq == seq)
    }

    /// Remove a delivered item.
    pub fn remove(&mut self, seq: SeqNo) -> Option<QueueItem> {
        let index = self.items.iter().position(|item| item.seq == seq)?;
        Some(self.items.remove(index))
    }

    /// Replace an item's payload in place, keeping its position.
    pub fn replace_payload(&mut self, seq: SeqNo, payload: Record) -> Result<()> {
        let item = self
            .items
            .iter_mut()
            .find(|item| item.seq == seq)
            .ok_or(Error::ItemNotFound(seq))?;
        item.payload = payload;
        Ok(())
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keys of records with a delete still waiting in the queue.
    ///
    /// Items whose key cannot be derived are skipped; they will fail on drain
    /// anyway.
    pub fn pending_delete_keys(
        &self,
        resolver: &IdentityResolver<'_>,
        collection: &str,
    ) -> HashSet<NaturalKey> {
        self.items
            .iter()
            .filter(|item| item.collection == collection && item.operation == Operation::Delete)
            .filter_map(|item| resolver.derive(collection, &item.payload).ok().flatten())
            .collect()
    }
}

impl Default for SyncQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncSchema;
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    #[test]
    fn enqueue_assigns_increasing_seq() {
        let mut queue = SyncQueue::new();
        let first = queue
            .enqueue("sales", Operation::Create, record(json!({})), Utc::now())
            .seq;
        let second = queue
            .enqueue("sales", Operation::Update, record(json!({})), Utc::now())
            .seq;

        assert_eq!(first, 1);
        assert_eq!(second, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn remove_keeps_order_and_numbering() {
        let mut queue = SyncQueue::new();
        for _ in 0..3 {
            queue.enqueue("sales", Operation::Create, record(json!({})), Utc::now());
        }

        assert!(queue.remove(2).is_some());
        assert!(queue.remove(2).is_none());

        let seqs: Vec<_> = queue.items().iter().map(|i| i.seq).collect();
        assert_eq!(seqs, [1, 3]);

        let next = queue
            .enqueue("sales", Operation::Create, record(json!({})), Utc::now())
            .seq;
        assert_eq!(next, 4);
    }

    #[test]
    fn restore_sorts_and_continues_numbering() {
        let items = vec![
            QueueItem::new(7, "grn", Operation::Create, record(json!({})), Utc::now()),
            QueueItem::new(5, "grn", Operation::Update, record(json!({})), Utc::now()),
        ];

        let mut queue = SyncQueue::restore(items);
        assert_eq!(queue.items()[0].seq, 5);

        let next = queue
            .enqueue("grn", Operation::Delete, record(json!({})), Utc::now())
            .seq;
        assert_eq!(next, 8);

        assert_eq!(SyncQueue::restore(Vec::new()), SyncQueue::new());
    }

    #[test]
    fn replace_payload_in_place() {
        let mut queue = SyncQueue::new();
        queue.enqueue("sales", Operation::Create, record(json!({"total": 1})), Utc::now());

        queue
            .replace_payload(1, record(json!({"total": 1, "id": "k1"})))
            .unwrap();
        assert_eq!(queue.get(1).unwrap().payload.get("id"), Some(&json!("k1")));

        assert_eq!(
            queue.replace_payload(9, Record::default()),
            Err(Error::ItemNotFound(9))
        );
    }

    #[test]
    fn pending_delete_keys_per_collection() {
        let schema = SyncSchema::point_of_sale("pos");
        let resolver = IdentityResolver::new(&schema);

        let mut queue = SyncQueue::new();
        queue.enqueue("inventory", Operation::Delete, record(json!({"code": "A"})), Utc::now());
        queue.enqueue("inventory", Operation::Update, record(json!({"code": "B"})), Utc::now());
        queue.enqueue("sales", Operation::Delete, record(json!({"code": "C"})), Utc::now());
        queue.enqueue("inventory", Operation::Delete, record(json!({})), Utc::now());

        let keys = queue.pending_delete_keys(&resolver, "inventory");
        assert_eq!(keys, HashSet::from(["A".to_string()]));
    }
}
