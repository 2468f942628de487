//! Backend selection.
//!
//! With no Redis connection string both the shared tier and the lock service
//! live in the current process. Otherwise one pooled Redis connection set
//! serves both.

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool;

use crate::config::{HybridCacheConfig, RedisConfig};
use crate::distributed::{DistributedTier, MemoryTier, RedisTier};
use crate::error::{CacheError, CacheResult};
use crate::lock::{LockManager, MemoryLockManager, RedisLockManager};

/// Shared-tier and lock backends chosen from configuration.
#[derive(Clone)]
pub struct Backends {
    pub distributed: Arc<dyn DistributedTier>,
    pub locks: Arc<dyn LockManager>,
    /// Present when Redis backs the shared tier; reused for pub/sub.
    pub redis_pool: Option<Pool>,
}

impl Backends {
    /// Process-local backends.
    pub fn in_memory() -> Self {
        Self {
            distributed: Arc::new(MemoryTier::new()),
            locks: Arc::new(MemoryLockManager::new()),
            redis_pool: None,
        }
    }

    /// Redis-backed shared tier and lock service over one pool.
    pub fn redis(pool: Pool, instance_name: &str) -> Self {
        Self {
            distributed: Arc::new(RedisTier::new(pool.clone(), instance_name)),
            locks: Arc::new(RedisLockManager::new(pool.clone(), instance_name)),
            redis_pool: Some(pool),
        }
    }
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends")
            .field("distributed", &self.distributed.name())
            .field("locks", &self.locks.name())
            .finish()
    }
}

/// Build and verify a Redis connection pool.
pub async fn create_pool(config: &RedisConfig) -> CacheResult<Pool> {
    let url = config
        .url()
        .ok_or_else(|| CacheError::configuration("redis.connection_string is not set"))?;

    let mut redis_config = deadpool_redis::Config::from_url(url);
    let timeout = Duration::from_millis(config.timeout_ms);
    let pool_config = redis_config
        .pool
        .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
    pool_config.max_size = config.pool_size;
    pool_config.timeouts.wait = Some(timeout);
    pool_config.timeouts.create = Some(timeout);
    pool_config.timeouts.recycle = Some(timeout);

    let pool = redis_config
        .create_pool(Some(deadpool_redis::Runtime::Tokio1))
        .map_err(|e| CacheError::configuration(format!("failed to create redis pool: {e}")))?;

    let mut conn = pool.get().await?;
    let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(pool)
}

/// Select backends for `config`.
///
/// A configured but unreachable Redis is an error rather than a silent
/// downgrade: process-local locks would not exclude other instances.
pub async fn connect(config: &HybridCacheConfig) -> CacheResult<Backends> {
    match config.redis.url() {
        None => {
            tracing::info!("no redis connection string, using in-process shared tier and locks");
            Ok(Backends::in_memory())
        }
        Some(url) => {
            tracing::info!(
                url = %url,
                pool_size = config.redis.pool_size,
                instance_name = %config.instance_name,
                "connecting to redis"
            );
            let pool = create_pool(&config.redis).await.inspect_err(|e| {
                tracing::error!(error = %e, "failed to connect to redis");
            })?;
            tracing::info!("connected to redis");
            Ok(Backends::redis(pool, &config.instance_name))
        }
    }
}
