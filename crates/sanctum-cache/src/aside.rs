//! Cache-aside engine with negative caching.
//!
//! Entries are stored as a small JSON envelope:
//!
//! - `{"value": <payload>}` for a cached value
//! - `"absent"` for a cached negative result
//!
//! The negative marker is a distinct envelope variant rather than a magic
//! payload, so no real value can be mistaken for it.
//!
//! ## Consistency
//!
//! No read-your-writes guarantee across concurrent writers. A write to the
//! source of truth may be followed by stale cached reads until TTL expiry
//! unless the writer calls [`CacheAside::invalidate`].

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::store::SharedStore;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// A cached value.
    Hit(T),
    /// Nothing cached (absent, expired, unreadable, or store unavailable).
    Miss,
    /// A cached "source of truth has no such entity".
    NegativeHit,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum Envelope<T> {
    Value(T),
    Absent,
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum EnvelopeRef<'a, T> {
    Value(&'a T),
    Absent,
}

fn record_lookup(outcome: &'static str) {
    counter!("cache_lookups_total", "outcome" => outcome).increment(1);
}

/// Read-through cache over a [`SharedStore`].
///
/// Cache writes are best-effort: a failed write is logged and dropped, and
/// correctness never depends on the cache holding the right value.
#[derive(Clone)]
pub struct CacheAside {
    store: SharedStore,
}

impl CacheAside {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// The underlying store handle.
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Look a key up without touching the source of truth.
    ///
    /// Store failures and undecodable entries are reported as [`Lookup::Miss`].
    pub async fn lookup<T: DeserializeOwned>(&self, key: &str) -> Lookup<T> {
        self.lookup_inner(key).await.unwrap_or(Lookup::Miss)
    }

    /// `Err` when the store could not be read; callers skip the write-back.
    async fn lookup_inner<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Lookup<T>> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                record_lookup("miss");
                return Ok(Lookup::Miss);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed, treating as miss");
                record_lookup("error");
                return Err(e);
            }
        };

        // An entry another reader wrote under a different type is left alone.
        match serde_json::from_slice::<Envelope<T>>(&raw) {
            Ok(Envelope::Value(value)) => {
                tracing::debug!(key = %key, "cache hit");
                record_lookup("hit");
                Ok(Lookup::Hit(value))
            }
            Ok(Envelope::Absent) => {
                tracing::debug!(key = %key, "cache negative hit");
                record_lookup("negative_hit");
                Ok(Lookup::NegativeHit)
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to decode cached entry");
                record_lookup("miss");
                Ok(Lookup::Miss)
            }
        }
    }

    /// Read `key` from the cache, or fetch it from the source of truth.
    ///
    /// 1. Negative hit: returns `Ok(None)` without calling `fetch`
    /// 2. Hit: returns the cached value
    /// 3. Miss: calls `fetch`; an error is returned unchanged and the cache is
    ///    left untouched; a value is written back best-effort and returned
    ///
    /// When the cache read itself failed, the fetched value is returned
    /// without a write-back.
    pub async fn read_through<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let store_readable = match self.lookup_inner::<T>(key).await {
            Ok(Lookup::Hit(value)) => return Ok(Some(value)),
            Ok(Lookup::NegativeHit) => return Ok(None),
            Ok(Lookup::Miss) => true,
            Err(_) => false,
        };

        let value = fetch().await?;
        if store_readable {
            self.put(key, &value, ttl).await;
        }
        Ok(Some(value))
    }

    /// Like [`read_through`](Self::read_through), for sources that can report
    /// "no such entity".
    ///
    /// A `None` from `fetch` is cached as a negative result for
    /// `negative_ttl`, so repeated misses stop reaching the source.
    pub async fn read_through_optional<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        negative_ttl: Duration,
        fetch: F,
    ) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        let store_readable = match self.lookup_inner::<T>(key).await {
            Ok(Lookup::Hit(value)) => return Ok(Some(value)),
            Ok(Lookup::NegativeHit) => return Ok(None),
            Ok(Lookup::Miss) => true,
            Err(_) => false,
        };

        let fetched = fetch().await?;
        if store_readable {
            match &fetched {
                Some(value) => self.put(key, value, ttl).await,
                None => self.store_negative(key, negative_ttl).await,
            }
        }
        Ok(fetched)
    }

    /// Write a value, best-effort.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(&EnvelopeRef::Value(value)) {
            Ok(payload) => self.write(key, &payload, ttl).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode value for cache");
            }
        }
    }

    /// Cache the fact that the source of truth has no entry for `key`.
    pub async fn store_negative(&self, key: &str, ttl: Duration) {
        match serde_json::to_vec(&EnvelopeRef::<()>::Absent) {
            Ok(payload) => self.write(key, &payload, ttl).await,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode negative entry");
            }
        }
    }

    /// Remove a cached entry. Called by write paths after changing the source.
    pub async fn invalidate(&self, key: &str) {
        match self.store.delete(key).await {
            Ok(_) => tracing::debug!(key = %key, "cache invalidated"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Cache invalidation failed"),
        }
    }

    async fn write(&self, key: &str, payload: &[u8], ttl: Duration) {
        match self.store.set(key, payload, ttl).await {
            Ok(()) => {
                tracing::debug!(key = %key, ttl_ms = %ttl.as_millis(), "cache set");
            }
            Err(e) => {
                counter!("cache_write_failures_total").increment(1);
                tracing::warn!(key = %key, error = %e, "Cache write failed, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::memory::MemoryStore;
    use crate::store::{KvStore, NoopStore};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        username: String,
    }

    fn alice() -> Profile {
        Profile {
            id: 1,
            username: "alice".to_string(),
        }
    }

    /// Memory store whose reads or writes can be made to fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        set_calls: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("read refused"));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::unavailable("write refused"));
            }
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> StoreResult<bool> {
            self.inner.delete(key).await
        }

        async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<u64> {
            self.inner.incr_with_expiry(key, window).await
        }

        async fn take(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.take(key).await
        }

        async fn ping(&self) -> StoreResult<()> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheAside::new(store.clone());
        let calls = &AtomicUsize::new(0);

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(alice())
        };

        let first = cache
            .read_through("user:1", Duration::from_secs(300), fetch)
            .await
            .unwrap();
        let raw_after_first = store.get("user:1").await.unwrap();

        let second = cache
            .read_through("user:1", Duration::from_secs(300), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Profile {
                    id: 1,
                    username: "changed".to_string(),
                })
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, Some(alice()));
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(store.get("user:1").await.unwrap(), raw_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetches_after_ttl() {
        let cache = CacheAside::new(Arc::new(MemoryStore::new()));
        let calls = &AtomicUsize::new(0);
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(alice())
        };

        cache
            .read_through("user:1", Duration::from_secs(60), fetch)
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(61)).await;
        cache
            .read_through("user:1", Duration::from_secs(60), fetch)
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_source_failure_propagates_and_leaves_cache_untouched() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheAside::new(store.clone());

        let result: Result<Option<Profile>, String> = cache
            .read_through("user:9", Duration::from_secs(60), || async {
                Err("db down".to_string())
            })
            .await;

        assert_eq!(result, Err("db down".to_string()));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_returns_value() {
        let store = Arc::new(FlakyStore::default());
        store.fail_writes.store(true, Ordering::SeqCst);
        let cache = CacheAside::new(store.clone());

        let value = cache
            .read_through("user:1", Duration::from_secs(60), || async {
                Ok::<_, String>(alice())
            })
            .await;

        assert_eq!(value, Ok(Some(alice())));
        assert!(store.inner.is_empty());
    }

    #[tokio::test]
    async fn test_cache_read_failure_falls_through_to_source() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let cache = CacheAside::new(store.clone());

        let value = cache
            .read_through("user:1", Duration::from_secs(60), || async {
                Ok::<_, String>(alice())
            })
            .await;
        assert_eq!(value, Ok(Some(alice())));
        assert_eq!(store.set_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_read_skips_negative_write_back() {
        let store = Arc::new(FlakyStore::default());
        store.fail_reads.store(true, Ordering::SeqCst);
        let cache = CacheAside::new(store.clone());

        let value = cache
            .read_through_optional(
                "user:404",
                Duration::from_secs(60),
                Duration::from_secs(30),
                || async { Ok::<Option<Profile>, String>(None) },
            )
            .await;
        assert_eq!(value, Ok(None));
        assert_eq!(store.set_calls.load(Ordering::SeqCst), 0);

        // Once reads recover the result is cached again
        store.fail_reads.store(false, Ordering::SeqCst);
        cache
            .read_through("user:1", Duration::from_secs(60), || async {
                Ok::<_, String>(alice())
            })
            .await
            .unwrap();
        assert_eq!(store.set_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_negative_entry_short_circuits_until_expiry() {
        let cache = CacheAside::new(Arc::new(MemoryStore::new()));
        let calls = &AtomicUsize::new(0);
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(alice())
        };

        cache.store_negative("user:404", Duration::from_secs(30)).await;

        for _ in 0..3 {
            let result = cache
                .read_through("user:404", Duration::from_secs(60), fetch)
                .await
                .unwrap();
            assert_eq!(result, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        let result = cache
            .read_through("user:404", Duration::from_secs(60), fetch)
            .await
            .unwrap();
        assert_eq!(result, Some(alice()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_through_optional_caches_absence() {
        let cache = CacheAside::new(Arc::new(MemoryStore::new()));
        let calls = &AtomicUsize::new(0);
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<Profile>, String>(None)
        };

        for _ in 0..2 {
            let result = cache
                .read_through_optional(
                    "user:77",
                    Duration::from_secs(60),
                    Duration::from_secs(30),
                    fetch,
                )
                .await
                .unwrap();
            assert_eq!(result, None);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            cache.lookup::<Profile>("user:77").await,
            Lookup::NegativeHit
        );
    }

    #[tokio::test]
    async fn test_payload_resembling_marker_is_a_hit() {
        let cache = CacheAside::new(Arc::new(MemoryStore::new()));
        cache
            .put("label:1", &"absent".to_string(), Duration::from_secs(60))
            .await;

        assert_eq!(
            cache.lookup::<String>("label:1").await,
            Lookup::Hit("absent".to_string())
        );
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_a_miss() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("user:1", b"not json", Duration::from_secs(60))
            .await
            .unwrap();
        let cache = CacheAside::new(store.clone());

        assert_eq!(cache.lookup::<Profile>("user:1").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_reader_with_other_type_keeps_entry() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheAside::new(store.clone());
        cache.put("user:1", &alice(), Duration::from_secs(60)).await;

        assert_eq!(cache.lookup::<Vec<u32>>("user:1").await, Lookup::Miss);
        assert_eq!(cache.lookup::<Profile>("user:1").await, Lookup::Hit(alice()));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = CacheAside::new(Arc::new(MemoryStore::new()));
        cache.put("user:1", &alice(), Duration::from_secs(60)).await;
        cache.invalidate("user:1").await;
        assert_eq!(cache.lookup::<Profile>("user:1").await, Lookup::Miss);
    }

    #[tokio::test]
    async fn test_absent_store_always_fetches() {
        let cache = CacheAside::new(Arc::new(NoopStore));
        let calls = &AtomicUsize::new(0);
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(alice())
        };

        for _ in 0..3 {
            let value = cache
                .read_through("user:1", Duration::from_secs(60), fetch)
                .await;
            assert_eq!(value, Ok(Some(alice())));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
