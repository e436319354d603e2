//! Remote store adapter for `tillsync-server`.
//!
//! Reads and writes go over HTTP (`/tree/{path}`, `/keys/{path}`);
//! subscriptions hold one WebSocket per watched path (`/subscribe?path=`),
//! each pushing a `snapshot` message on connect and after every change.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use tillsync_engine::protocol::{ClientMessage, GeneratedKey, ServerMessage};
use tillsync_engine::NaturalKey;

use crate::error::RemoteError;
use crate::store::{RemoteStore, SnapshotSender, WatchId};

/// Interval between keep-alive pings on subscription sockets.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// [`RemoteStore`] speaking to a tree store server.
#[derive(Debug)]
pub struct HttpRemoteStore {
    base: Url,
    client: reqwest::Client,
    subscriptions: Arc<DashMap<WatchId, JoinHandle<()>>>,
}

impl HttpRemoteStore {
    /// Create an adapter for the server at `base_url` (e.g. `http://localhost:3000`).
    pub fn new(base_url: &str) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url)
            .map_err(|e| RemoteError::Rejected(format!("invalid base URL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Rejected(format!(
                "invalid base URL: {}",
                base_url
            )));
        }
        Ok(Self {
            base,
            client: reqwest::Client::new(),
            subscriptions: Arc::new(DashMap::new()),
        })
    }

    /// Number of subscription sockets still open.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Build `<base>/<route>/<path segments>`, percent-encoding each segment.
    ///
    /// Every segment of `path` must survive into the URL as written; `.` and
    /// `..` would be dropped or resolved and retarget the request.
    fn url(&self, route: &str, path: &str) -> Result<Url, RemoteError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.iter().any(|s| *s == "." || *s == "..") {
            return Err(RemoteError::Rejected(format!(
                "path '{}' contains a relative segment",
                path
            )));
        }

        let mut url = self.base.clone();
        let before = segment_count(&url);
        url.path_segments_mut()
            .map_err(|_| RemoteError::Rejected("base URL cannot hold a path".into()))?
            .pop_if_empty()
            .push(route)
            .extend(&segments);
        if segment_count(&url) != before + 1 + segments.len() {
            return Err(RemoteError::Rejected(format!(
                "path '{}' does not map onto {}",
                path, url
            )));
        }
        Ok(url)
    }

    /// WebSocket URL for a subscription to `path`.
    fn subscribe_url(&self, path: &str) -> Result<Url, RemoteError> {
        let mut url = self.url("subscribe", "")?;
        let scheme = if self.base.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| RemoteError::Rejected(format!("cannot use {} for {}", scheme, url)))?;
        url.query_pairs_mut().append_pair("path", path);
        Ok(url)
    }
}

fn segment_count(url: &Url) -> usize {
    url.path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).count())
        .unwrap_or(0)
}

/// Map a transport failure.
fn unavailable(error: reqwest::Error) -> RemoteError {
    RemoteError::Unavailable(error.to_string())
}

/// Map a non-success response: client errors are rejections, the rest are
/// treated as the remote being unavailable.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("{}: {}", status, body);
    if status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT {
        Err(RemoteError::Rejected(message))
    } else {
        Err(RemoteError::Unavailable(message))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn set(&self, path: &str, value: Value) -> Result<(), RemoteError> {
        let url = self.url("tree", path)?;
        let response = self
            .client
            .put(url)
            .json(&value)
            .send()
            .await
            .map_err(unavailable)?;
        check(response).await?;
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.url("tree", path)?;
        let response = self.client.delete(url).send().await.map_err(unavailable)?;
        check(response).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, RemoteError> {
        let url = self.url("tree", path)?;
        let response = self.client.get(url).send().await.map_err(unavailable)?;
        let value: Value = check(response).await?.json().await.map_err(unavailable)?;
        Ok((!value.is_null()).then_some(value))
    }

    async fn generate_key(&self, path: &str) -> Result<NaturalKey, RemoteError> {
        let url = self.url("keys", path)?;
        let response = self.client.post(url).send().await.map_err(unavailable)?;
        let generated: GeneratedKey = check(response).await?.json().await.map_err(unavailable)?;
        Ok(generated.key)
    }

    async fn subscribe(&self, path: &str, sink: SnapshotSender) -> Result<WatchId, RemoteError> {
        let url = self.subscribe_url(path)?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        let id = uuid::Uuid::new_v4().to_string();
        let watched = path.to_string();
        let registered = Arc::clone(&self.subscriptions);
        let own_id = id.clone();
        let task = tokio::spawn(async move {
            let (mut outgoing, mut incoming) = socket.split();
            let mut ping = tokio::time::interval(PING_INTERVAL);
            ping.tick().await;

            loop {
                tokio::select! {
                    frame = incoming.next() => {
                        let text = match frame {
                            Some(Ok(Message::Text(text))) => text,
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => continue,
                            Some(Err(e)) => {
                                tracing::warn!(path = %watched, error = %e, "Subscription socket failed");
                                break;
                            }
                        };
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(ServerMessage::Snapshot { value, .. }) => {
                                let value = (!value.is_null()).then_some(value);
                                if sink.send(value).is_err() {
                                    break;
                                }
                            }
                            Ok(ServerMessage::Pong) => {}
                            Ok(ServerMessage::Error { message }) => {
                                tracing::warn!(path = %watched, message = %message, "Subscription error from server");
                            }
                            Err(e) => {
                                tracing::warn!(path = %watched, error = %e, "Unreadable subscription message");
                            }
                        }
                    }
                    _ = ping.tick() => {
                        let Ok(json) = serde_json::to_string(&ClientMessage::Ping) else {
                            continue;
                        };
                        if outgoing.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }

            // Dropping the sink here tells the watcher the stream has ended.
            drop(sink);
            registered.remove(&own_id);
            tracing::debug!(path = %watched, "Subscription closed");
        });

        self.subscriptions.insert(id.clone(), task);
        // The socket may already have closed before the handle was stored.
        self.subscriptions.remove_if(&id, |_, task| task.is_finished());
        tracing::debug!(path = %path, id = %id, "Subscribed");
        Ok(id)
    }

    async fn unsubscribe(&self, watch: &WatchId) {
        if let Some((_, task)) = self.subscriptions.remove(watch) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_urls_encode_segments() {
        let remote = HttpRemoteStore::new("http://localhost:3000/").unwrap();

        let url = remote.url("tree", "pos/users/a b@shop.lk").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/tree/pos/users/a%20b@shop.lk");

        let url = remote.url("keys", "/pos/sales/").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/keys/pos/sales");
    }

    #[test]
    fn relative_segments_are_refused() {
        let remote = HttpRemoteStore::new("http://localhost:3000").unwrap();
        for path in ["pos/inventory/..", "pos/inventory/.", "pos/../inventory"] {
            assert!(
                matches!(remote.url("tree", path), Err(RemoteError::Rejected(_))),
                "{path} should be refused"
            );
        }
        let url = remote.url("tree", "pos/inventory/...").unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/tree/pos/inventory/...");
    }

    #[tokio::test]
    async fn closed_socket_releases_its_subscription() {
        use tokio::sync::mpsc;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            let snapshot = ServerMessage::snapshot("pos/sales", None);
            let text = serde_json::to_string(&snapshot).unwrap();
            socket.send(Message::Text(text.into())).await.unwrap();
            socket.close(None).await.unwrap();
        });

        let remote = HttpRemoteStore::new(&format!("http://{}", addr)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        remote.subscribe("pos/sales", tx).await.unwrap();

        let wait = Duration::from_secs(2);
        let first = tokio::time::timeout(wait, rx.recv()).await.unwrap();
        assert_eq!(first, Some(None));
        // The sink is dropped once the socket closes.
        let end = tokio::time::timeout(wait, rx.recv()).await.unwrap();
        assert_eq!(end, None);
        server.await.unwrap();

        let released = tokio::time::timeout(wait, async {
            while remote.subscription_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(released.is_ok());
    }

    #[test]
    fn base_path_is_kept() {
        let remote = HttpRemoteStore::new("https://sync.example.com/api").unwrap();
        let url = remote.url("tree", "pos/grn").unwrap();
        assert_eq!(url.as_str(), "https://sync.example.com/api/tree/pos/grn");
    }

    #[test]
    fn subscribe_url_switches_scheme() {
        let remote = HttpRemoteStore::new("http://localhost:3000").unwrap();
        let url = remote.subscribe_url("pos/inventory").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://localhost:3000/subscribe?path=pos%2Finventory"
        );

        let secure = HttpRemoteStore::new("https://sync.example.com").unwrap();
        assert!(secure
            .subscribe_url("pos/sales")
            .unwrap()
            .as_str()
            .starts_with("wss://"));
    }

    #[test]
    fn rejects_bad_base_urls() {
        assert!(HttpRemoteStore::new("not a url").is_err());
        assert!(HttpRemoteStore::new("mailto:ops@example.com").is_err());
    }
}
