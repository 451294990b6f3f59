//! Store fakes shared by unit tests.

use std::time::Duration;

use async_trait::async_trait;
use sanctum_cache::{KvStore, StoreError, StoreResult};

/// A configured store whose every round-trip fails.
pub(crate) struct UnavailableStore;

#[async_trait]
impl KvStore for UnavailableStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> StoreResult<()> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn delete(&self, _key: &str) -> StoreResult<bool> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn incr_with_expiry(&self, _key: &str, _window: Duration) -> StoreResult<u64> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn take(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Err(StoreError::unavailable("connection refused"))
    }

    async fn ping(&self) -> StoreResult<()> {
        Err(StoreError::unavailable("connection refused"))
    }

    fn backend_name(&self) -> &'static str {
        "unavailable"
    }
}
