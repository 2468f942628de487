use std::time::{Duration, Instant};

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::Script;

use super::{LockHandle, LockManager};
use crate::error::CacheResult;
use crate::policy::{clamp_expiry, expiry_after};

/// Delete the lock only if it is still owned by the releasing token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const INITIAL_POLL: Duration = Duration::from_millis(10);
const MAX_POLL: Duration = Duration::from_millis(100);

/// Lock service backed by Redis `SET NX PX`.
///
/// Acquisition polls with a capped backoff until the wait budget runs out;
/// release is a compare-and-delete on the owner token.
pub struct RedisLockManager {
    pool: Pool,
    key_prefix: String,
    release_script: Script,
}

impl RedisLockManager {
    pub fn new(pool: Pool, key_prefix: impl Into<String>) -> Self {
        Self {
            pool,
            key_prefix: key_prefix.into(),
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    fn full_key(&self, lock_key: &str) -> String {
        format!("{}{}", self.key_prefix, lock_key)
    }

    async fn try_set(&self, handle: &LockHandle) -> CacheResult<bool> {
        let mut conn = self.pool.get().await?;
        let lease_ms = u64::try_from(clamp_expiry(handle.timeout()).as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.full_key(handle.lock_key()))
            .arg(handle.owner_token())
            .arg("NX")
            .arg("PX")
            .arg(lease_ms)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn try_acquire(
        &self,
        lock_key: &str,
        timeout: Duration,
    ) -> CacheResult<Option<LockHandle>> {
        let deadline = expiry_after(Instant::now(), timeout);
        let mut poll = INITIAL_POLL;
        loop {
            let handle = LockHandle::new(lock_key, timeout);
            if self.try_set(&handle).await? {
                tracing::trace!(lock_key = %lock_key, "acquired redis cache lock");
                return Ok(Some(handle));
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(lock_key = %lock_key, ?timeout, "redis cache lock wait timed out");
                return Ok(None);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
            poll = (poll * 2).min(MAX_POLL);
        }
    }

    async fn release(&self, handle: &LockHandle) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        let deleted: i64 = self
            .release_script
            .key(self.full_key(handle.lock_key()))
            .arg(handle.owner_token())
            .invoke_async(&mut conn)
            .await?;
        if deleted == 0 {
            tracing::debug!(
                lock_key = %handle.lock_key(),
                "redis cache lock already expired or taken over"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

impl std::fmt::Debug for RedisLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLockManager")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}
