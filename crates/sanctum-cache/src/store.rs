//! Key-value store adapter trait and store construction.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreResult;
use crate::memory::MemoryStore;
use crate::redis_store::RedisStore;
use crate::target::StoreTarget;

/// Uniform operations against the external key-value store.
///
/// Implementations must be safe for concurrent use by many request workers;
/// no operation holds an in-process lock across a network round-trip.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a value. `Ok(None)` means the key is absent or expired.
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Store a value that the store expires after `ttl`.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Remove a key. Returns whether a live value existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// Atomically increment a counter, creating it at 1 with a `window` TTL.
    ///
    /// The TTL is applied only when the counter is created, so the counter
    /// expires at the end of its window even if nobody clears it.
    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<u64>;

    /// Atomically fetch and remove a value.
    ///
    /// Of any number of concurrent callers on the same key, at most one
    /// observes the value.
    async fn take(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Round-trip to the store (health checks, startup probe).
    async fn ping(&self) -> StoreResult<()>;

    /// Whether a real store backs this adapter.
    fn is_configured(&self) -> bool {
        true
    }

    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    /// Release connections. Subsequent operations report `Unavailable`.
    async fn close(&self) {}
}

/// Shared handle to the configured store.
pub type SharedStore = Arc<dyn KvStore>;

/// Store used when no cache tier is configured.
///
/// Every read resolves as "not found" and every write is a no-op, so the
/// system runs correctly, only without caching.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl KvStore for NoopStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> StoreResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        Ok(false)
    }

    async fn incr_with_expiry(&self, _key: &str, _window: Duration) -> StoreResult<u64> {
        Ok(0)
    }

    async fn take(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "none"
    }
}

/// Create the store described by the configuration.
///
/// ## Modes
///
/// - **Disabled**: returns [`NoopStore`]
/// - **Memory**: returns an in-process [`MemoryStore`]
/// - **Redis**: connects and probes with `PING`, falls back to [`NoopStore`]
///   on failure
///
/// ## Graceful Degradation
///
/// An unreachable store never prevents startup; the service runs without a
/// cache tier and logs a warning.
pub async fn connect(config: &StoreConfig) -> SharedStore {
    if !config.enabled {
        tracing::info!("Cache store disabled, continuing without cache");
        return Arc::new(NoopStore);
    }

    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-process cache store");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::Redis => {
            let target = StoreTarget::parse(&config.url);
            tracing::info!(target = %target, "Connecting to cache store");

            match RedisStore::connect(&target, config).await {
                Ok(store) => {
                    tracing::info!(target = %target, "Connected to cache store");
                    Arc::new(store)
                }
                Err(e) => {
                    tracing::warn!(
                        target = %target,
                        error = %e,
                        "Cache store unreachable, continuing without cache"
                    );
                    Arc::new(NoopStore)
                }
            }
        }
    }
}
