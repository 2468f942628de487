//! Two-tier cache with distributed-lock stampede protection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ interception: Logging → Caching → Invalidate │
//! └──────────────────────┬───────────────────────┘
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │ HybridCacheProvider                          │
//! │   get_or_set · get · set · set_with_lock     │
//! │   remove · exists                            │
//! └──────┬──────────────────┬──────────────┬─────┘
//!        ▼                  ▼              ▼
//!   LocalTier (L1)   DistributedTier   LockManager
//!   moka, per-proc   Redis | memory    Redis | memory
//! ```
//!
//! Values are encoded once ([`Codec`]) and stored as bytes in both tiers.
//! On a total miss with locking enabled, exactly one caller across all
//! instances computes the value; the rest wait for the lock, re-check the
//! shared tier and read what the holder wrote.
//!
//! ## Example
//!
//! ```no_run
//! use hybrid_cache::{CachePolicy, CacheError, HybridCacheConfig, HybridCacheProvider, cache_key};
//!
//! # async fn run() -> Result<(), CacheError> {
//! let cache = HybridCacheProvider::from_config(HybridCacheConfig::default()).await?;
//! let key = cache_key("basket", "u1");
//! let items: Vec<String> = cache
//!     .get_or_set(&key, || async { Ok::<_, CacheError>(vec!["apple".to_string()]) }, &CachePolicy::locked())
//!     .await?;
//! assert_eq!(items.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod distributed;
pub mod error;
pub mod interception;
pub mod local;
pub mod lock;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod pubsub;

pub use backend::Backends;
pub use codec::Codec;
pub use config::{HybridCacheConfig, RedisConfig};
pub use distributed::{DistributedTier, MemoryTier, RedisTier};
pub use error::{CacheError, CacheResult};
pub use local::LocalTier;
pub use lock::{LockGuard, LockHandle, LockManager, MemoryLockManager, RedisLockManager};
pub use policy::{CachePolicy, MAX_EXPIRY, cache_key, clamp_expiry, expiration_until, lock_key_of};
pub use provider::{HybridCacheProvider, with_cancellation};
