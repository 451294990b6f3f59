//! Key-value store adapter and cache-aside engine.
//!
//! ## Architecture
//!
//! - **Store adapter** ([`KvStore`]): uniform get/set/delete/incr/take over
//!   Redis, an in-process map, or nothing at all
//! - **Cache-aside** ([`CacheAside`]): read cache, fall back to the source of
//!   truth on a miss, write back best-effort
//! - **Key inventory** ([`keys`]): key builders and per-resource TTLs
//!
//! ## Read Path
//!
//! ```text
//! read_through(key) → store GET ──hit──────────→ value
//!                         │ └──negative hit──→ None
//!                         └──miss → fetch() → SET (best effort) → value
//! ```
//!
//! ## Graceful Degradation
//!
//! If the store is unreachable or disabled, every read goes to the source of
//! truth. A cache failure never fails a read that succeeded at the source.

pub mod aside;
pub mod config;
pub mod error;
pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod store;
pub mod target;

pub use aside::{CacheAside, Lookup};
pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{KvStore, NoopStore, SharedStore, connect};
pub use target::StoreTarget;
