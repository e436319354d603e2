//! # Tillsync Engine
//!
//! The deterministic core of an offline-first synchronization engine for
//! point-of-sale data.
//!
//! This crate holds every piece of sync logic that does not need I/O: record
//! shaping, natural-key resolution, the ordered mutation queue, duplicate
//! reconciliation and download merge planning. The async orchestration that
//! talks to a local store and a remote document store lives in
//! `tillsync-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or platform
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Declarative**: Collections, key candidates and dedup rules are data
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a field map plus local bookkeeping: the local store's
//! `localId`, the remote key (`firebaseId`) for records that came from the
//! remote, and the `synced` flag. Bookkeeping never leaves the device.
//!
//! ### Natural keys
//!
//! Records are addressed remotely by a natural key (invoice number, product
//! code, email, ...). The [`SyncSchema`] declares, per collection, an ordered
//! list of candidate fields; the [`IdentityResolver`] picks the first populated
//! one. Records with no candidate get a key synthesized once, on create.
//!
//! ### Queue
//!
//! Local mutations are queued as [`QueueItem`]s carrying a closed
//! [`Operation`] (create, update, delete) and the full record. The
//! [`SyncQueue`] keeps them in enqueue order.
//!
//! ### Reconciliation
//!
//! After a collection is loaded, the [`DuplicateReconciler`] removes local
//! records that represent the same real-world entity, keeping the first one.
//! Synced local records are replaced by a download through a [`MergePlan`],
//! which never overwrites pending local work.
//!
//! ## Quick Start
//!
//! ```rust
//! use tillsync_engine::{IdentityResolver, Operation, Record, Resolution, SyncQueue, SyncSchema};
//! use serde_json::json;
//!
//! let schema = SyncSchema::point_of_sale("pos");
//! let resolver = IdentityResolver::new(&schema);
//!
//! let record = Record::from_value(json!({"name": "Widget", "code": "ITEM-001", "qty": 5})).unwrap();
//!
//! let mut queue = SyncQueue::new();
//! let item = queue.enqueue("inventory", Operation::Create, record, chrono::Utc::now());
//!
//! let resolution = resolver.resolve(item).unwrap();
//! assert_eq!(resolution, Resolution::Derived("ITEM-001".to_string()));
//! ```

pub mod dedup;
pub mod error;
pub mod identity;
pub mod merge;
pub mod operation;
pub mod path;
pub mod protocol;
pub mod queue;
pub mod record;
pub mod remote;
pub mod schema;

// Re-export main types at crate root
pub use dedup::{DuplicateReconciler, ReconcileOutcome};
pub use error::Error;
pub use identity::{assign_key, validate_key, IdentityResolver, Resolution};
pub use merge::{plan_merge, MergePlan};
pub use operation::{Operation, QueueItem};
pub use path::CollectionPath;
pub use queue::SyncQueue;
pub use record::{Fields, Record};
pub use remote::{materialize, materialize_entry, remote_payload, SYSTEM_ACTOR};
pub use schema::{CollectionSpec, DedupRule, KeyPart, Normalizer, SyncSchema, KNOWN_COLLECTIONS};

/// Type aliases for clarity
pub type CollectionName = String;
pub type NaturalKey = String;
pub type LocalId = u64;
pub type SeqNo = u64;
