use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;

use super::{LockHandle, LockManager};
use crate::error::CacheResult;
use crate::policy::expiry_after;

#[derive(Debug, Clone)]
struct Lease {
    owner_token: String,
    expires_at: Instant,
}

#[derive(Default)]
struct Inner {
    leases: DashMap<String, Lease>,
    released: Notify,
}

/// In-process lock service.
///
/// Clones share their lease table, so providers built over clones of one
/// manager contend exactly like separate processes contending on Redis.
/// Waiters park on a notification instead of polling and wake early when a
/// lock is released.
#[derive(Clone, Default)]
pub struct MemoryLockManager {
    inner: Arc<Inner>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leases currently held (expired leases not yet reclaimed included).
    pub fn held(&self) -> usize {
        self.inner.leases.len()
    }

    /// Claim the lock if free or if its holder's lease ran out; otherwise
    /// report when the current lease ends.
    fn try_claim(&self, lock_key: &str, timeout: Duration) -> Result<LockHandle, Instant> {
        let now = Instant::now();
        match self.inner.leases.entry(lock_key.to_string()) {
            Entry::Occupied(held) if held.get().expires_at > now => Err(held.get().expires_at),
            Entry::Occupied(mut stale) => {
                let handle = LockHandle::new(lock_key, timeout);
                tracing::debug!(lock_key = %lock_key, "reclaiming expired cache lock");
                stale.insert(Lease {
                    owner_token: handle.owner_token().to_string(),
                    expires_at: handle.expires_at(),
                });
                Ok(handle)
            }
            Entry::Vacant(free) => {
                let handle = LockHandle::new(lock_key, timeout);
                free.insert(Lease {
                    owner_token: handle.owner_token().to_string(),
                    expires_at: handle.expires_at(),
                });
                Ok(handle)
            }
        }
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn try_acquire(
        &self,
        lock_key: &str,
        timeout: Duration,
    ) -> CacheResult<Option<LockHandle>> {
        let deadline = expiry_after(Instant::now(), timeout);
        loop {
            // Register interest before checking so a release in between is not missed.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let lease_ends = match self.try_claim(lock_key, timeout) {
                Ok(handle) => return Ok(Some(handle)),
                Err(lease_ends) => lease_ends,
            };
            if Instant::now() >= deadline {
                tracing::debug!(lock_key = %lock_key, ?timeout, "cache lock wait timed out");
                return Ok(None);
            }

            let wake_at = tokio::time::Instant::from_std(lease_ends.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    async fn release(&self, handle: &LockHandle) -> CacheResult<()> {
        let removed = self
            .inner
            .leases
            .remove_if(handle.lock_key(), |_, lease| {
                lease.owner_token == handle.owner_token()
            })
            .is_some();
        if removed {
            self.inner.released.notify_waiters();
        } else {
            tracing::debug!(
                lock_key = %handle.lock_key(),
                "cache lock already expired or taken over, nothing to release"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryLockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLockManager")
            .field("held", &self.held())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let locks = MemoryLockManager::new();
        let first = locks
            .try_acquire("lock:k", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(first.is_some());

        let started = Instant::now();
        let second = locks
            .try_acquire("lock:k", Duration::from_millis(50))
            .await
            .unwrap();
        assert!(second.is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let locks = MemoryLockManager::new();
        let held = locks
            .try_acquire("lock:k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.try_acquire("lock:k", Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        locks.release(&held).await.unwrap();

        let acquired = waiter.await.unwrap().unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test]
    async fn test_abandoned_lease_is_reclaimed() {
        let locks = MemoryLockManager::new();
        let abandoned = locks
            .try_acquire("lock:k", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(abandoned.is_some());

        let next = locks
            .try_acquire("lock:k", Duration::from_millis(500))
            .await
            .unwrap();
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn test_stale_release_does_not_free_new_owner() {
        let locks = MemoryLockManager::new();
        let old = locks
            .try_acquire("lock:k", Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        let current = locks
            .try_acquire("lock:k", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        // late release by the previous owner is a no-op
        locks.release(&old).await.unwrap();
        let contender = locks
            .try_acquire("lock:k", Duration::from_millis(20))
            .await
            .unwrap();
        assert!(contender.is_none());

        locks.release(&current).await.unwrap();
        locks.release(&current).await.unwrap();
        assert_eq!(locks.held(), 0);
    }

    #[tokio::test]
    async fn test_unbounded_timeout_is_clamped() {
        let locks = MemoryLockManager::new();
        let held = locks
            .try_acquire("lock:k", Duration::MAX)
            .await
            .unwrap()
            .unwrap();
        assert!(!held.is_expired());

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.try_acquire("lock:k", Duration::MAX).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        locks.release(&held).await.unwrap();
        assert!(waiter.await.unwrap().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_independent_keys_do_not_contend() {
        let locks = MemoryLockManager::new();
        let a = locks.try_acquire("lock:a", Duration::from_secs(1)).await.unwrap();
        let b = locks.try_acquire("lock:b", Duration::from_millis(10)).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
    }
}
