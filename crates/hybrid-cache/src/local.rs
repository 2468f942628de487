//! Process-local (L1) tier.
//!
//! A bounded moka cache of encoded payloads. Each entry carries its own TTL,
//! capped by the configured local expiration, so a value never outlives the
//! shared copy it was promoted from. Operations never suspend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::sync::Cache;

use crate::policy::{clamp_expiry, expiry_after};

/// A locally cached payload with its absolute expiry.
#[derive(Clone, Debug)]
pub struct LocalEntry {
    pub data: Arc<Vec<u8>>,
    pub expires_at: Instant,
    ttl: Duration,
}

impl LocalEntry {
    fn new(data: Arc<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            data,
            expires_at: expiry_after(Instant::now(), ttl),
            ttl,
        }
    }

    /// Check if this entry has expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Instant::now()
    }
}

/// Per-entry expiration: every write (create or overwrite) restarts the clock
/// with the entry's own TTL.
struct PerEntryTtl;

impl Expiry<String, LocalEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &LocalEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Bounded in-process cache, cheap to clone (clones share storage).
#[derive(Clone)]
pub struct LocalTier {
    cache: Cache<String, LocalEntry>,
    max_ttl: Duration,
}

impl LocalTier {
    /// Create a local tier holding at most `max_entries`, each living at most `max_ttl`.
    pub fn new(max_entries: u64, max_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            cache,
            max_ttl: clamp_expiry(max_ttl),
        }
    }

    /// Get a live payload. Expired entries are removed and reported absent.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let entry = self.cache.get(key)?;
        if entry.is_expired() {
            self.cache.invalidate(key);
            return None;
        }
        Some(entry.data)
    }

    /// Insert or overwrite `key`. The TTL is capped at the tier's maximum.
    pub fn set(&self, key: &str, data: Arc<Vec<u8>>, ttl: Duration) {
        let ttl = ttl.min(self.max_ttl);
        self.cache.insert(key.to_string(), LocalEntry::new(data, ttl));
    }

    pub fn remove(&self, key: &str) {
        self.cache.invalidate(key);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries (pending maintenance may lag).
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn max_ttl(&self) -> Duration {
        self.max_ttl
    }
}

impl std::fmt::Debug for LocalTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTier")
            .field("entry_count", &self.cache.entry_count())
            .field("max_ttl", &self.max_ttl)
            .finish()
    }
}
