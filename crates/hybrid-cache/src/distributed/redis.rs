use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use super::DistributedTier;
use crate::error::CacheResult;
use crate::policy::clamp_expiry;

/// Shared tier backed by Redis.
///
/// Every key is stored under `key_prefix` (the configured instance name) so
/// several applications can share one Redis without colliding.
#[derive(Clone)]
pub struct RedisTier {
    pool: Pool,
    key_prefix: String,
}

impl RedisTier {
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }
}

#[async_trait]
impl DistributedTier for RedisTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.pool.get().await?;
        let value: Option<Vec<u8>> = conn.get(self.full_key(key)).await?;
        tracing::trace!(key = %key, hit = value.is_some(), "redis GET");
        Ok(value)
    }

    async fn get_with_ttl(&self, key: &str) -> CacheResult<Option<(Vec<u8>, Option<Duration>)>> {
        let mut conn = self.pool.get().await?;
        let full_key = self.full_key(key);
        let (value, pttl): (Option<Vec<u8>>, i64) = redis::pipe()
            .atomic()
            .get(&full_key)
            .pttl(&full_key)
            .query_async(&mut conn)
            .await?;
        tracing::trace!(key = %key, hit = value.is_some(), pttl, "redis GET+PTTL");
        // PTTL is -1 for a key without expiry and -2 for a missing key.
        let remaining = u64::try_from(pttl).ok().map(Duration::from_millis);
        Ok(value.map(|value| (value, remaining)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        // PX 0 is rejected by Redis; a zero TTL becomes the shortest legal lease.
        let ttl_ms = u64::try_from(clamp_expiry(ttl).as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        conn.pset_ex::<_, _, ()>(self.full_key(key), value, ttl_ms)
            .await?;
        tracing::trace!(key = %key, ttl_ms, "redis SET");
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.full_key(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let found: bool = conn.exists(self.full_key(key)).await?;
        Ok(found)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisTier")
            .field("key_prefix", &self.key_prefix)
            .field("pool", &self.pool.status())
            .finish()
    }
}
