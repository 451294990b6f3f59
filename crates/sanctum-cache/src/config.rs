//! Cache store configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which store implementation backs the cache tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis-compatible store (multi-instance deployments).
    Redis,
    /// In-process map (single instance, local development).
    Memory,
}

/// Cache store configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [store]
/// enabled = true
/// backend = "redis"
/// url = "plain://:password@localhost:6379/0"
/// op_timeout = "500ms"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Enable the cache tier. When disabled every read goes to the source of
    /// truth and ticket issuance is unavailable.
    pub enabled: bool,

    /// Store implementation.
    pub backend: StoreBackend,

    /// Connection string: `host:port` or `scheme://[:password@]host:port[/db]`.
    pub url: String,

    /// Connection pool size.
    pub pool_size: usize,

    /// Bound on establishing a connection and on the startup probe.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Bound on every individual store round-trip.
    #[serde(with = "humantime_serde")]
    pub op_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: StoreBackend::Redis,
            url: "localhost:6379".to_string(),
            pool_size: 10,
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_millis(500),
        }
    }
}

impl StoreConfig {
    /// Validate the store configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !self.enabled {
            return Ok(());
        }
        if self.pool_size == 0 {
            return Err("store.pool_size must be > 0".into());
        }
        if self.op_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err("store timeouts must be > 0".into());
        }
        if self.backend == StoreBackend::Redis && self.url.trim().is_empty() {
            return Err("store.url must not be empty for the redis backend".into());
        }
        Ok(())
    }
}
