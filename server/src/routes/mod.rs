//! HTTP route definitions.

mod health;
mod tree;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new().merge(health::routes()).merge(tree::routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::SubscriptionManager;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    /// Router over a pool that never connects; only routes that fail or
    /// answer before touching the database are exercised here.
    fn app() -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/tillsync_test")
            .unwrap();
        create_routes().with_state(AppState {
            pool,
            subscriptions: SubscriptionManager::new_shared(),
        })
    }

    async fn call(method: &str, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_version() {
        let (status, body) = call("GET", "/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn keys_are_generated_under_collections() {
        let (status, body) = call("POST", "/keys/pos/sales", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["key"].as_str().map(str::len), Some(32));

        let (status, body) = call("POST", "/keys/pos/sales/INV-1", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn paths_deeper_than_a_document_are_rejected() {
        let (status, _) = call("GET", "/tree/pos/sales/INV-1/total", "").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn namespace_cannot_be_overwritten() {
        let (status, _) = call("PUT", "/tree/pos", r#"{"sales": {}}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn collection_writes_need_an_object() {
        let (status, _) = call("PUT", "/tree/pos/sales", "42").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn collection_writes_validate_keys() {
        let (status, body) = call("PUT", "/tree/pos/sales", r#"{"": {"total": 1}}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("invalid natural key"));
    }
}
