//! Subscription manager.
//!
//! Tracks live subscription sockets by the tree path they watch, so a write
//! can find every subscriber that needs a fresh snapshot.
//!
//! Snapshots for one path are read and sent under that path's publish lock,
//! so subscribers receive them in the order they were read.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};

use crate::tree::TreePath;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single subscription socket.
#[derive(Debug)]
pub struct Subscriber {
    /// Watched path
    pub path: TreePath,
    /// Channel to send messages to this socket
    pub sender: MessageSender,
}

/// Manages live subscriptions.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct SubscriptionManager {
    /// All subscribers, keyed by subscriber ID.
    subscribers: DashMap<String, Subscriber>,
    /// Index of subscriber IDs by watched path.
    by_path: DashMap<TreePath, Vec<String>>,
    /// Publish lock per watched path, created on first use.
    publishing: DashMap<TreePath, Arc<Mutex<()>>>,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new subscription manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a subscriber on `path`.
    ///
    /// Returns the subscriber ID.
    pub fn register(&self, path: TreePath, sender: MessageSender) -> String {
        let sub_id = uuid::Uuid::new_v4().to_string();

        self.by_path
            .entry(path.clone())
            .or_default()
            .push(sub_id.clone());

        tracing::info!(sub_id = %sub_id, path = %path, "Subscriber registered");

        self.subscribers.insert(sub_id.clone(), Subscriber { path, sender });

        sub_id
    }

    /// Unregister a subscriber.
    pub fn unregister(&self, sub_id: &str) {
        if let Some((_, sub)) = self.subscribers.remove(sub_id) {
            if let Some(mut ids) = self.by_path.get_mut(&sub.path) {
                ids.retain(|id| id != sub_id);
                if ids.is_empty() {
                    drop(ids);
                    self.by_path.remove_if(&sub.path, |_, ids| ids.is_empty());
                    if !self.by_path.contains_key(&sub.path) {
                        // Only when no publish holds or awaits it.
                        self.publishing
                            .remove_if(&sub.path, |_, lock| Arc::strong_count(lock) == 1);
                    }
                }
            }

            tracing::info!(sub_id = %sub_id, path = %sub.path, "Subscriber unregistered");
        }
    }

    /// Wait for exclusive right to snapshot and send at `path`.
    ///
    /// Hold the guard from the read until the message is queued.
    pub async fn lock_path(&self, path: &TreePath) -> OwnedMutexGuard<()> {
        let lock = self.publishing.entry(path.clone()).or_default().clone();
        lock.lock_owned().await
    }

    /// Watched paths that see a change at `changed`.
    pub fn affected_paths(&self, changed: &TreePath) -> Vec<TreePath> {
        self.by_path
            .iter()
            .filter(|entry| entry.key().overlaps(changed))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Send a message to every subscriber of exactly `path`.
    ///
    /// Returns the number of subscribers that received it.
    pub fn send_to_path(&self, path: &TreePath, message: &ServerMessage) -> usize {
        let ids = match self.by_path.get(path) {
            Some(ids) => ids.clone(),
            None => return 0,
        };

        ids.iter()
            .filter(|id| self.send_to(id, message.clone()))
            .count()
    }

    /// Send a message to one subscriber.
    pub fn send_to(&self, sub_id: &str, message: ServerMessage) -> bool {
        self.subscribers
            .get(sub_id)
            .is_some_and(|sub| sub.sender.send(message).is_ok())
    }

    /// Get the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Get the number of distinct watched paths.
    pub fn path_count(&self) -> usize {
        self.by_path.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn path(raw: &str) -> TreePath {
        TreePath::parse(raw).unwrap()
    }

    #[test]
    fn test_register_unregister() {
        let manager = SubscriptionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        let first = manager.register(path("pos/sales"), tx.clone());
        let second = manager.register(path("pos/sales"), tx);
        assert_eq!(manager.subscriber_count(), 2);
        assert_eq!(manager.path_count(), 1);

        manager.unregister(&first);
        assert_eq!(manager.path_count(), 1);
        manager.unregister(&second);
        manager.unregister(&second);
        assert_eq!(manager.subscriber_count(), 0);
        assert_eq!(manager.path_count(), 0);
    }

    #[test]
    fn test_affected_paths() {
        let manager = SubscriptionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        manager.register(path("pos/sales"), tx.clone());
        manager.register(path("pos/sales/INV-1"), tx.clone());
        manager.register(path("pos/inventory"), tx.clone());
        manager.register(path("pos"), tx);

        let mut affected: Vec<String> = manager
            .affected_paths(&path("pos/sales/INV-1"))
            .iter()
            .map(ToString::to_string)
            .collect();
        affected.sort();
        assert_eq!(affected, ["pos", "pos/sales", "pos/sales/INV-1"]);

        // Dropping a whole collection reaches document watchers too.
        let mut affected: Vec<String> = manager
            .affected_paths(&path("pos/sales"))
            .iter()
            .map(ToString::to_string)
            .collect();
        affected.sort();
        assert_eq!(affected, ["pos", "pos/sales", "pos/sales/INV-1"]);
    }

    #[test]
    fn test_send_to_path() {
        let manager = SubscriptionManager::new();
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        manager.register(path("pos/sales"), tx1);
        manager.register(path("pos/inventory"), tx2);

        let message = ServerMessage::snapshot("pos/sales", Some(json!({"INV-1": {}})));
        assert_eq!(manager.send_to_path(&path("pos/sales"), &message), 1);

        assert_eq!(rx1.try_recv().unwrap(), message);
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_publish_lock_serializes_one_path() {
        let manager = Arc::new(SubscriptionManager::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.register(path("pos/inventory"), tx);

        let guard = manager.lock_path(&path("pos/inventory")).await;
        let later = {
            let manager = manager.clone();
            tokio::spawn(async move {
                let _guard = manager.lock_path(&path("pos/inventory")).await;
                let message = ServerMessage::snapshot("pos/inventory", Some(json!({"A": 2})));
                manager.send_to_path(&path("pos/inventory"), &message);
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!later.is_finished());
        let earlier = ServerMessage::snapshot("pos/inventory", Some(json!({"A": 1})));
        manager.send_to_path(&path("pos/inventory"), &earlier);
        drop(guard);
        later.await.unwrap();

        assert_eq!(rx.try_recv().unwrap(), earlier);
        assert_eq!(
            rx.try_recv().unwrap(),
            ServerMessage::snapshot("pos/inventory", Some(json!({"A": 2})))
        );
    }

    #[tokio::test]
    async fn test_publish_locks_are_per_path() {
        let manager = SubscriptionManager::new();
        let _sales = manager.lock_path(&path("pos/sales")).await;
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            manager.lock_path(&path("pos/inventory")),
        )
        .await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_publish_lock_dropped_with_last_subscriber() {
        let manager = SubscriptionManager::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = manager.register(path("pos/grn"), tx);
        drop(manager.lock_path(&path("pos/grn")).await);
        assert_eq!(manager.publishing.len(), 1);

        manager.unregister(&id);
        assert!(manager.publishing.is_empty());
    }

    #[test]
    fn test_closed_subscriber_is_not_counted() {
        let manager = SubscriptionManager::new();
        let (tx, rx) = mpsc::unbounded_channel();
        manager.register(path("pos/users"), tx);
        drop(rx);

        assert_eq!(
            manager.send_to_path(&path("pos/users"), &ServerMessage::Pong),
            0
        );
    }
}
