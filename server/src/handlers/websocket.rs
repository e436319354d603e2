//! WebSocket handler for tree subscriptions.
//!
//! One socket watches one path. The current value is sent right after the
//! socket registers, then the socket only receives what [`publish`] pushes.
//!
//! [`publish`]: super::publish

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use sqlx::PgPool;
use tokio::sync::mpsc;

use crate::tree::TreePath;
use crate::websocket::{ClientMessage, ServerMessage, SubscriptionManager};

use super::read_tree;

/// Handle an established subscription socket until it closes.
pub async fn handle_subscription(
    socket: WebSocket,
    pool: PgPool,
    subscriptions: Arc<SubscriptionManager>,
    path: TreePath,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    // Registered before the first read, so no change in between is missed.
    let sub_id = subscriptions.register(path.clone(), tx);
    send_snapshot(&pool, &subscriptions, &sub_id, &path).await;

    tracing::info!(sub_id = %sub_id, path = %path, "Subscription socket connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Refresh) => {
                    send_snapshot(&pool, &subscriptions, &sub_id, &path).await;
                }
                Ok(ClientMessage::Ping) => {
                    subscriptions.send_to(&sub_id, ServerMessage::Pong);
                }
                Err(e) => {
                    subscriptions.send_to(
                        &sub_id,
                        ServerMessage::error(format!("Invalid message format: {}", e)),
                    );
                }
            },
            Ok(Message::Binary(_)) => {
                tracing::warn!("Binary messages not supported");
            }
            Ok(Message::Ping(data)) => {
                tracing::trace!("Received ping: {} bytes", data.len());
            }
            Ok(Message::Pong(_)) => {
                tracing::trace!("Received pong");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(sub_id = %sub_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(sub_id = %sub_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    subscriptions.unregister(&sub_id);
    send_task.abort();

    tracing::info!(
        sub_id = %sub_id,
        path = %path,
        active_subscribers = subscriptions.subscriber_count(),
        watched_paths = subscriptions.path_count(),
        "Subscription socket disconnected"
    );
}

/// Send the current value at `path` to one subscriber.
async fn send_snapshot(
    pool: &PgPool,
    subscriptions: &SubscriptionManager,
    sub_id: &str,
    path: &TreePath,
) {
    let _publishing = subscriptions.lock_path(path).await;
    let message = match read_tree(pool, path).await {
        Ok(value) => ServerMessage::snapshot(path.to_string(), value),
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Failed to read snapshot");
            ServerMessage::error(e.to_string())
        }
    };
    subscriptions.send_to(sub_id, message);
}
