//! Wire messages of the tree store's subscription socket.
//!
//! All messages are JSON-encoded, tagged by `type`, and use snake_case for
//! field names. Shared by the server and the HTTP remote adapter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from a subscriber to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the current value at the subscribed path again.
    Refresh,

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from the server to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full current value at the subscribed path.
    ///
    /// Sent once on connect and again after every change under the path.
    Snapshot {
        /// Subscribed path
        path: String,
        /// Current value, `null` when nothing is stored there
        value: Value,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
    },
}

impl ServerMessage {
    /// Create a snapshot message, mapping an absent value to `null`.
    pub fn snapshot(path: impl Into<String>, value: Option<Value>) -> Self {
        ServerMessage::Snapshot {
            path: path.into(),
            value: value.unwrap_or(Value::Null),
        }
    }

    /// Create an error message.
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

/// Body returned by the key generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedKey {
    pub key: String,
}
