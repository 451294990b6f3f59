//! In-process store backed by DashMap.
//!
//! Used for single-instance deployments and as the injected store in tests.
//! Expiry uses `tokio::time::Instant`, so tests can pause and advance time.
//!
//! Expired entries are removed lazily on read and swept on the write path at
//! most once per [`PURGE_INTERVAL`], so keys that are never read again (old
//! rate-limit windows, unconsumed tickets) do not accumulate.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::store::KvStore;

/// Minimum time between two sweeps of expired entries.
pub const PURGE_INTERVAL: Duration = Duration::from_secs(30);

struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl MemoryEntry {
    fn new(value: Vec<u8>, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

/// In-memory key-value store with per-entry expiry.
///
/// Atomic operations (`incr_with_expiry`, `take`) rely on DashMap's per-shard
/// locking; no lock is held across an await point.
pub struct MemoryStore {
    entries: DashMap<String, MemoryEntry>,
    next_purge: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_purge: Mutex::new(Instant::now() + PURGE_INTERVAL),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    /// Sweep if the purge interval has elapsed. Skips when another writer is
    /// already sweeping.
    fn purge_if_due(&self) {
        let now = Instant::now();
        {
            let Ok(mut next) = self.next_purge.try_lock() else {
                return;
            };
            if *next > now {
                return;
            }
            *next = now + PURGE_INTERVAL;
        }

        let removed = self.purge_expired();
        if removed > 0 {
            tracing::debug!(removed, "Purged expired in-process cache entries");
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        self.purge_if_due();
        self.entries
            .insert(key.to_string(), MemoryEntry::new(value.to_vec(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired()))
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<u64> {
        self.purge_if_due();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if !occupied.get().is_expired() => {
                let entry = occupied.get_mut();
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| {
                        StoreError::unavailable(format!("value at {key} is not an integer"))
                    })?;
                let next = current + 1;
                entry.value = next.to_string().into_bytes();
                Ok(next)
            }
            Entry::Occupied(mut occupied) => {
                occupied.insert(MemoryEntry::new(b"1".to_vec(), window));
                Ok(1)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(MemoryEntry::new(b"1".to_vec(), window));
                Ok(1)
            }
        }
    }

    async fn take(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .entries
            .remove(key)
            .filter(|(_, entry)| !entry.is_expired())
            .map(|(_, entry)| entry.value))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
