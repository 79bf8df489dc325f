//! Broadcast service configuration.
//!
//! Configuration is loaded from environment variables. The Redis URL is
//! redacted in Debug output since it may embed credentials.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default WebSocket (push channel) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default change-feed stream key.
pub const DEFAULT_FEED_STREAM: &str = "meeting-messages:changes";

/// Default change-feed consumer group.
pub const DEFAULT_FEED_GROUP: &str = "broadcast-service";

/// Default number of feed entries read per batch.
pub const DEFAULT_FEED_BATCH_SIZE: usize = 100;

/// Default blocking read timeout for the feed, in milliseconds.
pub const DEFAULT_FEED_BLOCK_MS: u64 = 5000;

/// Default interval between re-reads of unacknowledged feed entries.
pub const DEFAULT_FEED_PENDING_RETRY_SECONDS: u64 = 30;

/// Default per-connection push timeout in milliseconds.
pub const DEFAULT_PUSH_TIMEOUT_MS: u64 = 2000;

/// Default outbound frame buffer per WebSocket session.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Default instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "bs";

/// Connection registry storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryBackend {
    /// Shared Redis registry (multi-instance deployments).
    Redis,
    /// Process-local registry (single instance, development).
    Memory,
}

impl RegistryBackend {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.to_ascii_lowercase().as_str() {
            "redis" => Ok(RegistryBackend::Redis),
            "memory" => Ok(RegistryBackend::Memory),
            other => Err(ConfigError::InvalidValue(format!(
                "BS_REGISTRY_BACKEND must be 'redis' or 'memory', got '{other}'"
            ))),
        }
    }

    /// Returns the backend name for logging.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RegistryBackend::Redis => "redis",
            RegistryBackend::Memory => "memory",
        }
    }
}

/// Broadcast service configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL (registry and change feed).
    /// `None` only when the registry backend is `memory`.
    pub redis_url: Option<SecretString>,

    /// Registry storage backend (default: redis).
    pub registry_backend: RegistryBackend,

    /// WebSocket server bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Identifier for this instance; used as the feed consumer name.
    /// Defaults to `bs-{HOSTNAME}`, stable across restarts of the same host.
    pub instance_id: String,

    /// Redis Stream carrying message change events.
    pub feed_stream: String,

    /// Consumer group shared by all broadcast instances.
    pub feed_group: String,

    /// Maximum entries per feed read.
    pub feed_batch_size: usize,

    /// Blocking read timeout for the feed.
    pub feed_block: Duration,

    /// Interval between re-reads of this consumer's pending entries.
    pub feed_pending_retry: Duration,

    /// Upper bound on a single push to one connection.
    pub push_timeout: Duration,

    /// Outbound frame buffer per WebSocket session.
    pub outbound_buffer: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "[REDACTED]"))
            .field("registry_backend", &self.registry_backend)
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("instance_id", &self.instance_id)
            .field("feed_stream", &self.feed_stream)
            .field("feed_group", &self.feed_group)
            .field("feed_batch_size", &self.feed_batch_size)
            .field("feed_block", &self.feed_block)
            .field("feed_pending_retry", &self.feed_pending_retry)
            .field("push_timeout", &self.push_timeout)
            .field("outbound_buffer", &self.outbound_buffer)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let registry_backend = match vars.get("BS_REGISTRY_BACKEND") {
            Some(value) => RegistryBackend::parse(value)?,
            None => RegistryBackend::Redis,
        };

        let redis_url = vars.get("REDIS_URL").cloned().map(SecretString::from);
        if registry_backend == RegistryBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::MissingEnvVar("REDIS_URL".to_string()));
        }

        let bind_address = vars
            .get("BS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("BS_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let feed_stream = vars
            .get("BS_FEED_STREAM")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FEED_STREAM.to_string());

        let feed_group = vars
            .get("BS_FEED_GROUP")
            .cloned()
            .unwrap_or_else(|| DEFAULT_FEED_GROUP.to_string());

        let feed_batch_size = parse_positive(vars, "BS_FEED_BATCH_SIZE", DEFAULT_FEED_BATCH_SIZE)?;

        let feed_block = Duration::from_millis(
            vars.get("BS_FEED_BLOCK_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FEED_BLOCK_MS),
        );

        let feed_pending_retry = Duration::from_secs(
            vars.get("BS_FEED_PENDING_RETRY_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_FEED_PENDING_RETRY_SECONDS),
        );

        let push_timeout = Duration::from_millis(
            vars.get("BS_PUSH_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PUSH_TIMEOUT_MS),
        );

        let outbound_buffer = parse_positive(vars, "BS_OUTBOUND_BUFFER", DEFAULT_OUTBOUND_BUFFER)?;

        // Also the consumer-group consumer name; it must survive restarts so
        // the instance can pick its own pending entries back up.
        let instance_id = vars.get("BS_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = vars.get("HOSTNAME").map_or("unknown", String::as_str);
            format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}")
        });

        Ok(Config {
            redis_url,
            registry_backend,
            bind_address,
            health_bind_address,
            instance_id,
            feed_stream,
            feed_group,
            feed_batch_size,
            feed_block,
            feed_pending_retry,
            push_timeout,
            outbound_buffer,
        })
    }
}

/// Parse a size that must be at least 1. Zero is rejected.
fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => match raw.parse::<usize>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidValue(format!(
                "{key} must be a positive integer, got '{raw}'"
            ))),
            Ok(value) => Ok(value),
        },
    }
}
