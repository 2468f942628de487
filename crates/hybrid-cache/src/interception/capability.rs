//! Capabilities a request may expose to the interception layer.
//!
//! Capabilities are independent: a request implements whichever traits apply
//! and returns them from the matching `as_*` accessor on [`Request`]. The layer only
//! ever asks "does this request have capability X", never "what type is it".

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::policy::{CachePolicy, expiration_until};

/// A unit of work flowing through a handler pipeline.
pub trait Request: Send + Sync + 'static {
    type Response: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Name used in logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn as_cacheable(&self) -> Option<&dyn CacheableRequest> {
        None
    }

    fn as_lock_protected(&self) -> Option<&dyn LockProtectedRequest> {
        None
    }

    fn as_invalidating(&self) -> Option<&dyn InvalidatingRequest> {
        None
    }
}

/// Response may be served from, and populates, the cache.
pub trait CacheableRequest: Send + Sync {
    fn cache_key(&self) -> String;

    /// Absolute expiry for the cached response; `None` uses the provider default.
    fn absolute_expiration(&self) -> Option<OffsetDateTime> {
        None
    }

    /// Policy for a plain cache-aside read (no lock).
    fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            expiration: self.absolute_expiration().map(expiration_until),
            use_distributed_lock: Some(false),
            lock_timeout: None,
        }
    }
}

/// Population additionally serialized across instances by the distributed lock.
pub trait LockProtectedRequest: CacheableRequest {
    fn use_distributed_lock(&self) -> bool {
        true
    }

    /// `None` uses the provider's default lock timeout.
    fn lock_timeout(&self) -> Option<Duration> {
        None
    }

    fn locked_policy(&self) -> CachePolicy {
        CachePolicy {
            use_distributed_lock: Some(self.use_distributed_lock()),
            lock_timeout: self.lock_timeout(),
            ..self.cache_policy()
        }
    }
}

/// Successful handling makes a cached entry stale.
pub trait InvalidatingRequest: Send + Sync {
    fn invalidation_key(&self) -> String;
}
