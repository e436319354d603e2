//! Tree store routes.
//!
//! - `GET/PUT/DELETE /tree/{*path}` read, overwrite and remove
//! - `POST /keys/{*path}` generates a key under a collection
//! - `GET /subscribe?path=` upgrades to a subscription socket

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use tillsync_engine::protocol::GeneratedKey;

use crate::error::Result;
use crate::handlers::{
    generate_key, handle_delete, handle_put, handle_subscription, read_tree,
};
use crate::tree::TreePath;
use crate::AppState;

/// Query of the subscription endpoint.
#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    pub path: String,
}

/// Create tree routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/tree/{*path}",
            get(get_handler).put(put_handler).delete(delete_handler),
        )
        .route("/keys/{*path}", post(keys_handler))
        .route("/subscribe", get(subscribe_handler))
}

/// GET /tree/{path} - Current value, `null` when absent.
async fn get_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<Value>> {
    let path = TreePath::parse(&path)?;
    let value = read_tree(&state.pool, &path).await?;
    Ok(Json(value.unwrap_or(Value::Null)))
}

/// PUT /tree/{path} - Overwrite the value.
async fn put_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Json(value): Json<Value>,
) -> Result<StatusCode> {
    let path = TreePath::parse(&path)?;
    handle_put(&state.pool, &state.subscriptions, &path, value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /tree/{path} - Remove the value.
async fn delete_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<StatusCode> {
    let path = TreePath::parse(&path)?;
    handle_delete(&state.pool, &state.subscriptions, &path).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /keys/{path} - Generate a document key.
async fn keys_handler(Path(path): Path<String>) -> Result<Json<GeneratedKey>> {
    let path = TreePath::parse(&path)?;
    Ok(Json(generate_key(&path)?))
}

/// GET /subscribe?path= - Open a subscription socket.
async fn subscribe_handler(
    State(state): State<AppState>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response> {
    let path = TreePath::parse(&query.path)?;
    Ok(ws.on_upgrade(move |socket| {
        handle_subscription(socket, state.pool, state.subscriptions, path)
    }))
}
