//! Hybrid cache provider: local tier in front of a shared tier, with
//! lock-protected population.
//!
//! ## Read path
//!
//! ```text
//! get_or_set(key)
//!   ├─ local hit ─────────────────────────────► value
//!   ├─ shared hit ─► promote to local ────────► value
//!   └─ miss
//!        ├─ unlocked: compute ─► write both ──► value
//!        └─ locked: acquire lock:{key}
//!             ├─ timeout ─────────────────────► LockAcquisitionTimeout
//!             └─ held: re-check shared tier
//!                  ├─ hit ─► promote ─► release ► value
//!                  └─ compute ─► write both ─► release ► value
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::backend::{self, Backends};
use crate::codec::Codec;
use crate::config::HybridCacheConfig;
use crate::distributed::DistributedTier;
use crate::error::{CacheError, CacheResult};
use crate::local::LocalTier;
use crate::lock::{LockGuard, LockManager};
use crate::metrics;
use crate::policy::{CachePolicy, lock_key_of};
use crate::pubsub::InvalidationBus;

/// Two-tier cache with stampede protection.
///
/// Share one provider per process (behind an `Arc`); every operation takes
/// `&self`.
pub struct HybridCacheProvider {
    local: LocalTier,
    distributed: Arc<dyn DistributedTier>,
    locks: Arc<dyn LockManager>,
    config: HybridCacheConfig,
    codec: Codec,
    invalidations: Option<InvalidationBus>,
}

impl HybridCacheProvider {
    /// Assemble a provider over explicit backends.
    pub fn new(
        config: HybridCacheConfig,
        distributed: Arc<dyn DistributedTier>,
        locks: Arc<dyn LockManager>,
    ) -> Self {
        let local = LocalTier::new(config.local_max_entries, config.local_expiration());
        Self {
            local,
            distributed,
            locks,
            codec: config.serializer,
            config,
            invalidations: None,
        }
    }

    /// Provider over process-local backends.
    pub fn in_memory(config: HybridCacheConfig) -> Self {
        Self::with_backends(config, Backends::in_memory())
    }

    pub fn with_backends(config: HybridCacheConfig, backends: Backends) -> Self {
        Self::new(config, backends.distributed, backends.locks)
    }

    /// Validate `config`, connect the configured backends and, when
    /// requested, start cross-instance invalidation.
    pub async fn from_config(config: HybridCacheConfig) -> CacheResult<Self> {
        config.validate().map_err(CacheError::configuration)?;
        let backends = backend::connect(&config).await?;
        let redis_pool = backends.redis_pool.clone();
        let mut provider = Self::with_backends(config, backends);

        if provider.config.broadcast_invalidations {
            if let (Some(pool), Some(url)) = (redis_pool, provider.config.redis.url()) {
                provider.invalidations = Some(InvalidationBus::start(
                    pool,
                    url,
                    &provider.config.instance_name,
                    provider.local.clone(),
                ));
            }
        }

        tracing::info!(
            distributed = provider.distributed.name(),
            locks = provider.locks.name(),
            serializer = ?provider.codec,
            broadcast_invalidations = provider.invalidations.is_some(),
            "hybrid cache ready"
        );
        Ok(provider)
    }

    pub fn config(&self) -> &HybridCacheConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalTier {
        &self.local
    }

    pub fn lock_manager(&self) -> Arc<dyn LockManager> {
        Arc::clone(&self.locks)
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// Errors from `compute` come back unchanged. Cache-layer failures
    /// (`LockAcquisitionTimeout`, `Backend`, `Serialization`) arrive through
    /// `E: From<CacheError>`. A result that encodes to null is returned but
    /// not stored.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        compute: F,
        policy: &CachePolicy,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup(key).await? {
            return Ok(value);
        }
        metrics::record_cache_miss();
        tracing::debug!(key = %key, "cache miss");

        let ttl = policy
            .expiration
            .unwrap_or_else(|| self.config.default_expiration());
        let use_lock = policy
            .use_distributed_lock
            .unwrap_or(self.config.use_distributed_lock);

        if !use_lock {
            let value = Self::run_compute(key, compute).await?;
            self.store_computed(key, &value, ttl).await?;
            return Ok(value);
        }

        let lock_timeout = policy
            .lock_timeout
            .unwrap_or_else(|| self.config.default_lock_timeout());
        let guard = self.acquire(key, lock_timeout).await?;

        let result = self.populate_locked(key, compute, ttl).await;
        if let Err(e) = guard.release().await {
            // The lease expires on its own; the populated value is still good.
            tracing::warn!(key = %key, error = %e, "failed to release cache lock");
        }
        result
    }

    /// Steps run while holding the population lock.
    async fn populate_locked<T, E, F, Fut>(&self, key: &str, compute: F, ttl: Duration) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.lookup_distributed(key).await? {
            tracing::debug!(key = %key, "populated by another holder while waiting for lock");
            return Ok(value);
        }
        let value = Self::run_compute(key, compute).await?;
        self.store_computed(key, &value, ttl).await?;
        Ok(value)
    }

    async fn run_compute<T, E, F, Fut>(key: &str, compute: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        metrics::record_computation();
        tracing::debug!(key = %key, "computing value");
        compute().await
    }

    /// Read `key` from the local tier, then the shared tier. Never computes
    /// and never locks.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        self.lookup(key).await
    }

    /// Unconditional write-through, local tier first. `ttl` defaults to the
    /// configured expiration.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let bytes = self.codec.encode(key, value)?;
        let ttl = ttl.unwrap_or_else(|| self.config.default_expiration());
        self.write_both(key, bytes, ttl).await
    }

    /// [`set`](Self::set) serialized with other writers of `key` through the
    /// population lock. Fails with `LockAcquisitionTimeout` like `get_or_set`.
    #[instrument(level = "debug", skip_all, fields(key = %key))]
    pub async fn set_with_lock<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        lock_timeout: Option<Duration>,
    ) -> CacheResult<()> {
        let bytes = self.codec.encode(key, value)?;
        let ttl = ttl.unwrap_or_else(|| self.config.default_expiration());
        let lock_timeout = lock_timeout.unwrap_or_else(|| self.config.default_lock_timeout());

        let guard = self.acquire(key, lock_timeout).await?;
        let written = self.write_both(key, bytes, ttl).await;
        let released = guard.release().await;
        written.and(released)
    }

    /// Delete `key` from both tiers, then notify other instances if
    /// invalidation broadcast is enabled.
    pub async fn remove(&self, key: &str) -> CacheResult<()> {
        self.local.remove(key);
        self.distributed.remove(key).await?;
        tracing::debug!(key = %key, "cache entry removed");
        if let Some(bus) = &self.invalidations {
            bus.publish(key).await;
        }
        Ok(())
    }

    /// True if either tier holds a live entry for `key`.
    ///
    /// Presence only: the payload is not decoded, so an undecodable shared
    /// entry still counts until a [`get`](Self::get) deletes it.
    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        if self.local.contains(key) {
            return Ok(true);
        }
        self.distributed.exists(key).await
    }

    async fn acquire(&self, key: &str, timeout: Duration) -> CacheResult<LockGuard> {
        let lock_key = lock_key_of(key);
        match LockGuard::acquire(Arc::clone(&self.locks), &lock_key, timeout).await? {
            Some(guard) => {
                tracing::debug!(key = %key, lock_key = %lock_key, "cache lock acquired");
                Ok(guard)
            }
            None => {
                tracing::warn!(
                    key = %key,
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out waiting for cache lock"
                );
                Err(CacheError::lock_timeout(key, timeout))
            }
        }
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        if let Some(value) = self.lookup_local(key) {
            return Ok(Some(value));
        }
        self.lookup_distributed(key).await
    }

    fn lookup_local<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.local.get(key)?;
        match self.codec.decode(&bytes) {
            Ok(value) => {
                metrics::record_cache_hit("local");
                tracing::debug!(key = %key, tier = "local", "cache hit");
                Some(value)
            }
            Err(e) => {
                metrics::record_corrupted_entry("local");
                tracing::warn!(key = %key, tier = "local", error = %e, "dropping undecodable cache entry");
                self.local.remove(key);
                None
            }
        }
    }

    /// Shared-tier read. A hit is promoted to the local tier for at most the
    /// shared entry's remaining lifetime; an entry that fails to decode is
    /// deleted from both tiers and reported absent.
    async fn lookup_distributed<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        let Some((bytes, remaining)) = self.distributed.get_with_ttl(key).await? else {
            return Ok(None);
        };
        match self.codec.decode(&bytes) {
            Ok(value) => {
                metrics::record_cache_hit("distributed");
                tracing::debug!(key = %key, tier = "distributed", "cache hit");
                let local_ttl = remaining.map_or(self.config.local_expiration(), |remaining| {
                    remaining.min(self.config.local_expiration())
                });
                self.local.set(key, Arc::new(bytes), local_ttl);
                Ok(Some(value))
            }
            Err(e) => {
                metrics::record_corrupted_entry("distributed");
                tracing::warn!(
                    key = %key,
                    tier = "distributed",
                    error = %e,
                    "deleting undecodable cache entry"
                );
                self.local.remove(key);
                self.distributed.remove(key).await?;
                Ok(None)
            }
        }
    }

    /// Write a computed value unless it encodes to null.
    async fn store_computed<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<()> {
        let bytes = self.codec.encode(key, value)?;
        if self.codec.is_null(&bytes) {
            tracing::debug!(key = %key, "computed value is null, not caching");
            return Ok(());
        }
        self.write_both(key, bytes, ttl).await
    }

    async fn write_both(&self, key: &str, bytes: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let bytes = Arc::new(bytes);
        self.local.set(key, Arc::clone(&bytes), ttl);
        self.distributed.set(key, &bytes, ttl).await?;
        tracing::debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "cache entry written");
        Ok(())
    }
}

impl std::fmt::Debug for HybridCacheProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCacheProvider")
            .field("local", &self.local)
            .field("distributed", &self.distributed.name())
            .field("locks", &self.locks.name())
            .field("codec", &self.codec)
            .field("broadcast_invalidations", &self.invalidations.is_some())
            .finish()
    }
}

/// Race `fut` against `token`.
///
/// On cancellation the future is dropped (any lock guard it holds releases
/// in the background) and `CacheError::Cancelled` is returned.
pub async fn with_cancellation<T, E, Fut>(token: &CancellationToken, fut: Fut) -> Result<T, E>
where
    E: From<CacheError>,
    Fut: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CacheError::Cancelled.into()),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::MemoryTier;
    use crate::lock::MemoryLockManager;

    fn provider() -> HybridCacheProvider {
        HybridCacheProvider::in_memory(HybridCacheConfig::default())
    }

    #[tokio::test]
    async fn test_local_hit_skips_shared_tier() {
        let shared = MemoryTier::new();
        let cache = HybridCacheProvider::new(
            HybridCacheConfig::default(),
            Arc::new(shared.clone()),
            Arc::new(MemoryLockManager::new()),
        );
        cache.set("k", &"v".to_string(), None).await.unwrap();

        // Gone from the shared tier, still served locally.
        shared.remove("k").await.unwrap();
        let value: Option<String> = cache.get("k").await.unwrap();
        assert_eq!(value.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_shared_hit_is_promoted() {
        let shared = MemoryTier::new();
        shared
            .set("k", br#""from-shared""#, Duration::from_secs(60))
            .await
            .unwrap();
        let cache = HybridCacheProvider::new(
            HybridCacheConfig::default(),
            Arc::new(shared),
            Arc::new(MemoryLockManager::new()),
        );

        let value: Option<String> = cache.get("k").await.unwrap();
        assert_eq!(value.as_deref(), Some("from-shared"));
        assert!(cache.local().contains("k"));
    }

    #[tokio::test]
    async fn test_null_result_is_not_cached() {
        let cache = provider();
        let value: Option<String> = cache
            .get_or_set("k", || async { Ok::<_, CacheError>(None) }, &CachePolicy::unlocked())
            .await
            .unwrap();
        assert!(value.is_none());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_with_lock_times_out_while_held() {
        let cache = provider();
        let held = cache
            .lock_manager()
            .try_acquire(&lock_key_of("k"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(held.is_some());

        let err = cache
            .set_with_lock("k", &1u32, None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.is_lock_timeout());
        assert!(!cache.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancellation_yields_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<u32, CacheError> =
            with_cancellation(&token, std::future::pending()).await;
        assert!(matches!(result, Err(CacheError::Cancelled)));
    }
}
