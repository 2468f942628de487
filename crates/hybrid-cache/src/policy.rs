//! Per-call cache policy and key helpers.

use std::time::{Duration, Instant};

use time::OffsetDateTime;

/// Prefix that keeps lock keys out of the data-key namespace
const LOCK_KEY_PREFIX: &str = "lock:";

/// Longest TTL or lock lease honoured (100 years); longer durations are clamped.
pub const MAX_EXPIRY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Clamp a caller-supplied TTL or lease to [`MAX_EXPIRY`].
#[inline]
pub fn clamp_expiry(duration: Duration) -> Duration {
    duration.min(MAX_EXPIRY)
}

/// `now + duration` without overflow; `duration` is clamped first.
pub(crate) fn expiry_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(clamp_expiry(duration)).unwrap_or(now)
}

/// Per-call caching options.
///
/// Fields left unset resolve against the provider's configured defaults at
/// call time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePolicy {
    pub expiration: Option<Duration>,
    /// `None` defers to `HybridCacheConfig::use_distributed_lock`
    pub use_distributed_lock: Option<bool>,
    pub lock_timeout: Option<Duration>,
}

impl CachePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy for a plain cache-aside read: no cross-process protection.
    pub fn unlocked() -> Self {
        Self {
            use_distributed_lock: Some(false),
            ..Default::default()
        }
    }

    /// Policy that serializes population behind the distributed lock.
    pub fn locked() -> Self {
        Self {
            use_distributed_lock: Some(true),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }

    /// Expire at an absolute instant; a deadline already in the past yields a zero TTL.
    #[must_use]
    pub fn expires_at(mut self, deadline: OffsetDateTime) -> Self {
        self.expiration = Some(expiration_until(deadline));
        self
    }

    #[must_use]
    pub fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn distributed_lock(mut self, enabled: bool) -> Self {
        self.use_distributed_lock = Some(enabled);
        self
    }
}

/// Relative TTL until `deadline`, collapsing past deadlines to zero.
pub fn expiration_until(deadline: OffsetDateTime) -> Duration {
    Duration::try_from(deadline - OffsetDateTime::now_utc()).unwrap_or(Duration::ZERO)
}

/// Compose a namespaced key, e.g. `cache_key("basket", user_id)` → `basket:{user_id}`.
#[inline]
pub fn cache_key(kind: &str, id: impl std::fmt::Display) -> String {
    format!("{kind}:{id}")
}

/// Lock key guarding population of `key`.
#[inline]
pub fn lock_key_of(key: &str) -> String {
    format!("{LOCK_KEY_PREFIX}{key}")
}
