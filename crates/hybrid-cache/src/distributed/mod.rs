//! Shared (L2) tier.
//!
//! ## Implementations
//!
//! - **`RedisTier`**: network store shared by every instance pointing at the
//!   same Redis, native TTL eviction
//! - **`MemoryTier`**: in-process stand-in with the same contract, used for
//!   single-instance deployments and tests
//!
//! Payloads are opaque bytes; decoding (and self-healing of undecodable
//! entries) is the provider's concern.

mod memory;
mod redis;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;

pub use self::memory::MemoryTier;
pub use self::redis::RedisTier;

/// Key/value store with TTL support shared across instances.
///
/// Implementations surface connectivity failures as `CacheError::Backend`;
/// absence of a key is `Ok(None)`, never an error.
#[async_trait]
pub trait DistributedTier: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Like [`get`](Self::get), also returning the entry's remaining
    /// lifetime when the backend can report it.
    async fn get_with_ttl(&self, key: &str) -> CacheResult<Option<(Vec<u8>, Option<Duration>)>> {
        Ok(self.get(key).await?.map(|value| (value, None)))
    }

    /// Insert or overwrite `key`; the entry becomes absent once `ttl` elapses.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Delete `key`. Deleting a missing key succeeds.
    async fn remove(&self, key: &str) -> CacheResult<()>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// Short backend name for logs and stats.
    fn name(&self) -> &'static str;
}
