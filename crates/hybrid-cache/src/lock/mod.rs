//! Distributed mutual exclusion for cache population.
//!
//! A lock is identified by a lock key (see [`crate::lock_key_of`]) and owned
//! by a random token. Holders are leased: an abandoned lock frees itself once
//! its timeout elapses, and a release only succeeds for the token that
//! acquired it, so a late release can never free a lock someone else has
//! since taken.

mod memory;
mod redis;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CacheResult;
use crate::policy::expiry_after;

pub use self::memory::MemoryLockManager;
pub use self::redis::RedisLockManager;

/// Proof of ownership of a held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    lock_key: String,
    owner_token: String,
    acquired_at: Instant,
    timeout: Duration,
}

impl LockHandle {
    pub(crate) fn new(lock_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            lock_key: lock_key.into(),
            owner_token: Uuid::new_v4().to_string(),
            acquired_at: Instant::now(),
            timeout,
        }
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    pub fn owner_token(&self) -> &str {
        &self.owner_token
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Lease length; also the maximum wait used when acquiring.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// End of the lease; leases are capped at [`crate::MAX_EXPIRY`].
    pub fn expires_at(&self) -> Instant {
        expiry_after(self.acquired_at, self.timeout)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at() <= Instant::now()
    }
}

/// Cross-process mutex service.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Wait up to `timeout` for `lock_key`.
    ///
    /// Returns `Ok(None)` when the wait runs out. The granted lease also lasts
    /// `timeout`, after which the lock frees itself even if never released.
    async fn try_acquire(&self, lock_key: &str, timeout: Duration)
    -> CacheResult<Option<LockHandle>>;

    /// Release a held lock. Idempotent: releasing an expired lock, or one
    /// that has been re-acquired by another owner, is a no-op.
    async fn release(&self, handle: &LockHandle) -> CacheResult<()>;

    fn name(&self) -> &'static str;
}

/// Scoped lock ownership.
///
/// Prefer [`LockGuard::release`] on the normal path so failures surface; if
/// the guard is dropped while still holding the lock (early return, panic,
/// cancelled future) the release is spawned onto the current runtime.
pub struct LockGuard {
    handle: Option<LockHandle>,
    manager: Arc<dyn LockManager>,
}

impl LockGuard {
    /// Acquire `lock_key`, returning `Ok(None)` if it could not be obtained within `timeout`.
    pub async fn acquire(
        manager: Arc<dyn LockManager>,
        lock_key: &str,
        timeout: Duration,
    ) -> CacheResult<Option<Self>> {
        let started = Instant::now();
        let handle = manager.try_acquire(lock_key, timeout).await?;
        crate::metrics::record_lock_wait(started.elapsed(), handle.is_some());
        Ok(handle.map(|handle| Self {
            handle: Some(handle),
            manager,
        }))
    }

    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    pub async fn release(mut self) -> CacheResult<()> {
        match self.handle.take() {
            Some(handle) => self.manager.release(&handle).await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let manager = Arc::clone(&self.manager);
                runtime.spawn(async move {
                    if let Err(e) = manager.release(&handle).await {
                        tracing::warn!(
                            lock_key = %handle.lock_key(),
                            error = %e,
                            "failed to release dropped cache lock"
                        );
                    }
                });
            }
            Err(_) => {
                // No runtime to release on; the lease runs out on its own.
                tracing::debug!(
                    lock_key = %handle.lock_key(),
                    "cache lock dropped outside a runtime, leaving it to expire"
                );
            }
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("handle", &self.handle)
            .field("manager", &self.manager.name())
            .finish()
    }
}
