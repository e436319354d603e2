//! Configuration management for the sync engine.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tillsync_engine::{SyncSchema, SYSTEM_ACTOR};

/// Default namespace every collection path is rooted at.
pub const DEFAULT_NAMESPACE: &str = "pos";
/// Default deadline of a single remote call.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Remote namespace
    pub namespace: String,
    /// Actor recorded as `syncedBy` on remote writes
    pub actor: String,
    /// Deadline applied to every remote call
    pub remote_timeout: Duration,
    /// Whether dedup removals are also deleted remotely
    pub dedup_remote: bool,
    /// Queue journal file; `None` keeps the queue in memory
    pub queue_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            actor: SYSTEM_ACTOR.to_string(),
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            dedup_remote: false,
            queue_path: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is read first, if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(namespace) = lookup("TILLSYNC_NAMESPACE") {
            if namespace.is_empty() || namespace.contains('/') {
                return Err(ConfigError::InvalidNamespace(namespace));
            }
            config.namespace = namespace;
        }

        if let Some(actor) = lookup("TILLSYNC_ACTOR") {
            config.actor = actor;
        }

        if let Some(raw) = lookup("TILLSYNC_REMOTE_TIMEOUT_MS") {
            let millis: u64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
            if millis == 0 {
                return Err(ConfigError::InvalidTimeout(raw));
            }
            config.remote_timeout = Duration::from_millis(millis);
        }

        if let Some(raw) = lookup("TILLSYNC_DEDUP_REMOTE") {
            config.dedup_remote = match raw.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => return Err(ConfigError::InvalidFlag("TILLSYNC_DEDUP_REMOTE", raw)),
            };
        }

        config.queue_path = lookup("TILLSYNC_QUEUE_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(config)
    }

    /// The point-of-sale catalog rooted at this configuration's namespace.
    pub fn schema(&self) -> SyncSchema {
        SyncSchema::point_of_sale(self.namespace.clone())
    }

    /// Builder-style method to set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Builder-style method to set the actor.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    /// Builder-style method to set the remote call deadline.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Builder-style method to propagate dedup removals to the remote.
    pub fn with_dedup_remote(mut self, enabled: bool) -> Self {
        self.dedup_remote = enabled;
        self
    }

    /// Builder-style method to persist the queue at `path`.
    pub fn with_queue_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.queue_path = Some(path.into());
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TILLSYNC_NAMESPACE value: {0:?}")]
    InvalidNamespace(String),

    #[error("Invalid TILLSYNC_REMOTE_TIMEOUT_MS value: {0:?}")]
    InvalidTimeout(String),

    #[error("Invalid {0} value: {1:?}")]
    InvalidFlag(&'static str, String),
}
