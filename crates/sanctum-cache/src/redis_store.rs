//! Redis-backed store over a deadpool connection pool.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use metrics::counter;
use redis::{AsyncCommands, RedisResult, Script};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::KvStore;
use crate::target::StoreTarget;

/// Increments a counter and sets its expiry only when the counter is created.
const INCR_WITH_EXPIRY: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Returns a value and deletes it in the same server-side step.
const GET_AND_DELETE: &str = r"
local value = redis.call('GET', KEYS[1])
if value then
  redis.call('DEL', KEYS[1])
end
return value
";

/// Redis-compatible store.
///
/// Every command is bounded by `op_timeout`; a timeout is reported as
/// [`StoreError::Unavailable`]. Scripts run server-side, so `take` and
/// `incr_with_expiry` leave no window between their read and write.
pub struct RedisStore {
    pool: Pool,
    op_timeout: Duration,
    incr_script: Script,
    take_script: Script,
}

impl RedisStore {
    /// Build a pool for `target` and probe it with `PING`.
    pub async fn connect(target: &StoreTarget, config: &StoreConfig) -> StoreResult<Self> {
        let mut redis_config = Config::from_url(target.to_url());
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.connect_timeout);
        pool_config.timeouts.create = Some(config.connect_timeout);
        pool_config.timeouts.recycle = Some(config.connect_timeout);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(format!("failed to create pool: {e}")))?;

        let store = Self::from_pool(pool, config.op_timeout);
        match tokio::time::timeout(config.connect_timeout, store.ping()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(StoreError::unavailable(format!(
                    "startup probe timed out after {:?}",
                    config.connect_timeout
                )));
            }
        }
        Ok(store)
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: Pool, op_timeout: Duration) -> Self {
        Self {
            pool,
            op_timeout,
            incr_script: Script::new(INCR_WITH_EXPIRY),
            take_script: Script::new(GET_AND_DELETE),
        }
    }

    async fn run<T, F, Fut>(&self, command: &'static str, op: F) -> StoreResult<T>
    where
        F: FnOnce(Connection) -> Fut + Send,
        Fut: Future<Output = RedisResult<T>> + Send,
        T: Send,
    {
        let attempt = async {
            let conn = self
                .pool
                .get()
                .await
                .map_err(|e| StoreError::unavailable(format!("failed to get connection: {e}")))?;
            op(conn)
                .await
                .map_err(|e| StoreError::unavailable(e.to_string()))
        };

        let result = match tokio::time::timeout(self.op_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::unavailable(format!(
                "{command} timed out after {:?}",
                self.op_timeout
            ))),
        };

        if let Err(ref e) = result {
            counter!("cache_store_errors_total", "command" => command).increment(1);
            tracing::debug!(command, error = %e, "Cache store command failed");
        }
        result
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.run("GET", |mut conn| async move {
            conn.get::<_, Option<Vec<u8>>>(key).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let millis = ttl_millis(ttl);
        self.run("PSETEX", |mut conn| async move {
            conn.pset_ex::<_, _, ()>(key, value, millis).await
        })
        .await
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.run("DEL", |mut conn| async move {
            conn.del::<_, u64>(key).await.map(|removed| removed > 0)
        })
        .await
    }

    async fn incr_with_expiry(&self, key: &str, window: Duration) -> StoreResult<u64> {
        let millis = ttl_millis(window);
        let script = &self.incr_script;
        self.run("INCR", |mut conn| async move {
            let count: u64 = script.key(key).arg(millis).invoke_async(&mut conn).await?;
            Ok(count)
        })
        .await
    }

    async fn take(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let script = &self.take_script;
        self.run("GETDEL", |mut conn| async move {
            let value: Option<Vec<u8>> = script.key(key).invoke_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.run("PING", |mut conn| async move {
            let _: String = redis::cmd("PING").query_async(&mut conn).await?;
            Ok(())
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn close(&self) {
        self.pool.close();
        tracing::info!("Cache store connections closed");
    }
}
