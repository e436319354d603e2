//! Realtime listener registry.
//!
//! Tracks live subscriptions to remote collections. Every remote change
//! delivers the full current collection, materialized like a download. The
//! registry is indexed by subscription id and by collection, so one listener
//! can be removed cheaply and all of them can be torn down at shutdown.
//!
//! A listener whose remote stream ends on its own is closed and dropped from
//! the registry, so subscribing again opens a fresh stream.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use tillsync_engine::{materialize, CollectionName, CollectionPath, Record, SyncSchema};

use crate::error::Result;
use crate::merger::CollectionMerger;
use crate::store::{with_deadline, RemoteStore, WatchId};

/// Application callback receiving a collection's current records.
pub type ListenerCallback = Arc<dyn Fn(Vec<Record>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifier of a registered listener.
pub type SubscriptionId = String;

/// Delivery state shared by a listener's task and its handles.
///
/// The gate is held for the whole of a delivery, so closing (which takes the
/// gate once after raising the flag) waits out an in-flight callback.
#[derive(Default)]
struct ListenerState {
    closed: AtomicBool,
    gate: Mutex<()>,
}

impl ListenerState {
    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        drop(self.gate.lock().await);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A registered listener.
struct Listener {
    collection: CollectionName,
    callback: ListenerCallback,
    watch: WatchId,
    state: Arc<ListenerState>,
    task: JoinHandle<()>,
}

struct RegistryInner {
    schema: Arc<SyncSchema>,
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
    merger: Option<CollectionMerger>,
    /// All listeners, keyed by subscription id.
    listeners: DashMap<SubscriptionId, Listener>,
    /// Index of subscription ids by collection.
    by_collection: DashMap<CollectionName, Vec<SubscriptionId>>,
    /// Serializes subscribe so the (collection, callback) check is atomic.
    subscribing: Mutex<()>,
}

/// Registry of realtime listeners.
///
/// Cheap to clone; clones share the same listeners.
#[derive(Clone)]
pub struct ListenerRegistry {
    inner: Arc<RegistryInner>,
}

impl ListenerRegistry {
    pub fn new(schema: Arc<SyncSchema>, remote: Arc<dyn RemoteStore>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                schema,
                remote,
                timeout,
                merger: None,
                listeners: DashMap::new(),
                by_collection: DashMap::new(),
                subscribing: Mutex::new(()),
            }),
        }
    }

    /// Registry that merges every snapshot into the local store before the
    /// callback runs.
    pub fn with_merger(
        schema: Arc<SyncSchema>,
        remote: Arc<dyn RemoteStore>,
        timeout: Duration,
        merger: CollectionMerger,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                schema,
                remote,
                timeout,
                merger: Some(merger),
                listeners: DashMap::new(),
                by_collection: DashMap::new(),
                subscribing: Mutex::new(()),
            }),
        }
    }

    /// Listen to a collection.
    ///
    /// Subscribing the same callback (same `Arc`) to the same collection
    /// again returns the existing subscription.
    pub async fn subscribe(
        &self,
        collection: &str,
        callback: ListenerCallback,
    ) -> Result<Subscription> {
        let inner = &self.inner;
        inner.schema.collection(collection)?;
        let _subscribing = inner.subscribing.lock().await;

        if let Some(existing) = self.find(collection, &callback) {
            tracing::debug!(collection = %collection, id = %existing.id, "Listener already registered");
            return Ok(existing);
        }

        let path = CollectionPath::of(&inner.schema, collection).to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let watch = with_deadline(inner.timeout, inner.remote.subscribe(&path, tx)).await?;

        let id = uuid::Uuid::new_v4().to_string();
        let state = Arc::new(ListenerState::default());
        let task = tokio::spawn(deliver(
            Delivery {
                id: id.clone(),
                collection: collection.to_string(),
                callback: callback.clone(),
                state: state.clone(),
                merger: inner.merger.clone(),
                registry: Arc::downgrade(&self.inner),
            },
            rx,
        ));

        inner.listeners.insert(
            id.clone(),
            Listener {
                collection: collection.to_string(),
                callback,
                watch,
                state: state.clone(),
                task,
            },
        );
        inner
            .by_collection
            .entry(collection.to_string())
            .or_default()
            .push(id.clone());

        tracing::info!(collection = %collection, id = %id, "Listener registered");

        Ok(Subscription {
            id,
            collection: collection.to_string(),
            state,
            registry: self.clone(),
        })
    }

    fn find(&self, collection: &str, callback: &ListenerCallback) -> Option<Subscription> {
        let ids = self.inner.by_collection.get(collection)?;
        ids.iter().find_map(|id| {
            let listener = self.inner.listeners.get(id)?;
            if listener.state.is_closed() {
                return None;
            }
            same_callback(&listener.callback, callback).then(|| Subscription {
                id: id.clone(),
                collection: collection.to_string(),
                state: listener.state.clone(),
                registry: self.clone(),
            })
        })
    }

    /// Remove a listener. Unknown or already removed ids are ignored.
    ///
    /// When this returns, the listener's callback is not running and will not
    /// run again. Must not be awaited from inside that listener's callback.
    pub async fn unsubscribe(&self, id: &str) {
        let Some((_, listener)) = self.inner.listeners.remove(id) else {
            return;
        };
        listener.state.close().await;
        self.teardown(id, &listener).await;
        listener.task.abort();
    }

    /// Drop a listener whose stream ended. Runs on the listener's own task.
    async fn release(&self, id: &str) {
        // Waits for a subscribe still inserting this listener.
        let _subscribing = self.inner.subscribing.lock().await;
        let Some((_, listener)) = self
            .inner
            .listeners
            .remove_if(id, |_, listener| listener.state.is_closed())
        else {
            return;
        };
        self.teardown(id, &listener).await;
    }

    async fn teardown(&self, id: &str, listener: &Listener) {
        if let Some(mut ids) = self.inner.by_collection.get_mut(&listener.collection) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                drop(ids);
                self.inner
                    .by_collection
                    .remove_if(&listener.collection, |_, ids| ids.is_empty());
            }
        }

        self.inner.remote.unsubscribe(&listener.watch).await;

        tracing::info!(collection = %listener.collection, id = %id, "Listener removed");
    }

    /// Tear down every listener.
    pub async fn cleanup_all(&self) -> usize {
        let ids: Vec<SubscriptionId> = self
            .inner
            .listeners
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for id in &ids {
            self.unsubscribe(id).await;
        }
        ids.len()
    }

    /// Number of live listeners.
    pub fn len(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Check if no listener is live.
    pub fn is_empty(&self) -> bool {
        self.inner.listeners.is_empty()
    }

    /// Number of live listeners on one collection.
    pub fn count_for(&self, collection: &str) -> usize {
        self.inner
            .by_collection
            .get(collection)
            .map_or(0, |ids| ids.len())
    }
}

/// What a listener's task needs to deliver snapshots.
struct Delivery {
    id: SubscriptionId,
    collection: CollectionName,
    callback: ListenerCallback,
    state: Arc<ListenerState>,
    merger: Option<CollectionMerger>,
    registry: Weak<RegistryInner>,
}

/// Forward snapshots to the callback until the listener closes or the
/// remote ends the stream.
async fn deliver(delivery: Delivery, mut rx: mpsc::UnboundedReceiver<Option<serde_json::Value>>) {
    let Delivery {
        id,
        collection,
        callback,
        state,
        merger,
        registry,
    } = delivery;

    while let Some(snapshot) = rx.recv().await {
        let _gate = state.gate.lock().await;
        if state.is_closed() {
            break;
        }

        let records = materialize(snapshot.as_ref());
        if let Some(merger) = &merger {
            if let Err(error) = merger.merge(&collection, records.clone()).await {
                tracing::warn!(collection = %collection, error = %error, "Listener merge failed");
            }
        }
        callback(records).await;
    }

    if state.is_closed() {
        return;
    }
    tracing::warn!(collection = %collection, id = %id, "Remote ended the listener stream");
    state.close().await;
    if let Some(inner) = registry.upgrade() {
        ListenerRegistry { inner }.release(&id).await;
    }
}

fn same_callback(a: &ListenerCallback, b: &ListenerCallback) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Handle to a registered listener.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriptionId,
    collection: CollectionName,
    state: Arc<ListenerState>,
    registry: ListenerRegistry,
}

impl Subscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Check if the listener is still live.
    pub fn is_active(&self) -> bool {
        !self.state.is_closed()
    }

    /// Stop the listener. Safe to call any number of times, from any clone.
    ///
    /// When this returns no callback invocation is in progress and none
    /// will follow.
    pub async fn unsubscribe(&self) {
        self.state.close().await;
        self.registry.unsubscribe(&self.id).await;
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Wrap an async closure as a [`ListenerCallback`].
pub fn callback<F, Fut>(f: F) -> ListenerCallback
where
    F: Fn(Vec<Record>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |records: Vec<Record>| -> BoxFuture<'static, ()> { Box::pin(f(records)) })
}
