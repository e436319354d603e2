//! # Tillsync Client
//!
//! The asynchronous half of tillsync: keeps a device's local store and a
//! shared remote tree store in step for a point-of-sale application that must
//! keep working offline.
//!
//! The local store is authoritative while offline. Every local write is
//! journaled in a durable queue and delivered later, in order. When
//! connectivity returns the engine downloads every collection, merges it into
//! the local store without touching pending work, and drains the queue.
//!
//! ## Components
//!
//! - [`SyncEngine`]: the facade an application talks to
//! - [`SyncQueueProcessor`]: sequential queue delivery
//! - [`CollectionDownloader`]: whole-collection downloads
//! - [`ListenerRegistry`]: realtime listeners with idempotent teardown
//! - [`LocalStore`] / [`RemoteStore`]: the collaborator traits, with in-memory
//!   implementations and an HTTP adapter for `tillsync-server`
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tillsync_client::{MemoryLocalStore, MemoryRemoteStore, SyncConfig, SyncEngine};
//!
//! # async fn run() -> tillsync_client::Result<()> {
//! let config = SyncConfig::from_env().unwrap_or_default();
//! let schema = config.schema();
//! let engine = SyncEngine::new(
//!     config,
//!     schema,
//!     Arc::new(MemoryLocalStore::new()),
//!     Arc::new(MemoryRemoteStore::new()),
//! )?;
//!
//! let fields = json!({"name": "Widget", "code": "ITEM-001", "qty": 5});
//! engine.create("inventory", fields.as_object().cloned().unwrap_or_default()).await?;
//!
//! let report = engine.start().await;
//! assert_eq!(report.drain.map(|d| d.processed), Some(1));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod http;
pub mod listeners;
pub mod locks;
pub mod memory;
pub mod merger;
pub mod processor;
pub mod queue;
pub mod store;

pub use config::{ConfigError, SyncConfig};
pub use downloader::{CollectionDownloader, DownloadReport};
pub use engine::{ResyncReport, SyncEngine};
pub use error::{LocalError, RemoteError, Result, SyncError};
pub use http::HttpRemoteStore;
pub use listeners::{callback, ListenerCallback, ListenerRegistry, Subscription};
pub use memory::{MemoryLocalStore, MemoryRemoteStore};
pub use merger::{CollectionMerger, MergeSummary};
pub use processor::{DrainFailure, DrainResult, SyncQueueProcessor};
pub use queue::{DurableQueue, QueueError};
pub use store::{LocalStore, RemoteStore, SnapshotSender, WatchId};
