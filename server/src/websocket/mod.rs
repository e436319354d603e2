//! WebSocket subscriptions to tree paths.
//!
//! A client opens one socket per watched path. The server sends the current
//! value on connect and a fresh `snapshot` after every change under the path.

mod manager;

pub use manager::SubscriptionManager;
pub use tillsync_engine::protocol::{ClientMessage, ServerMessage};
