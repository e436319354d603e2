//! Request handlers for the tree store.

mod tree;
mod websocket;

pub use tree::*;
pub use websocket::*;
