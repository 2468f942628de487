use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::DistributedTier;
use crate::error::CacheResult;
use crate::policy::expiry_after;

#[derive(Clone, Debug)]
struct StoredValue {
    data: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// In-process shared tier.
///
/// Clones share the same map, so several providers built over clones of one
/// `MemoryTier` behave like instances sharing a single store. Entries past
/// their expiry are reported absent and removed lazily.
#[derive(Clone, Default)]
pub struct MemoryTier {
    entries: Arc<DashMap<String, StoredValue>>,
}

impl MemoryTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, value| !value.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn live(&self, key: &str) -> Option<(Vec<u8>, Duration)> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some((entry.data.clone(), entry.expires_at - now));
            }
        } else {
            return None;
        }
        self.entries.remove_if(key, |_, value| value.is_expired(now));
        None
    }
}

#[async_trait]
impl DistributedTier for MemoryTier {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        Ok(self.live(key).map(|(data, _)| data))
    }

    async fn get_with_ttl(&self, key: &str) -> CacheResult<Option<(Vec<u8>, Option<Duration>)>> {
        Ok(self.live(key).map(|(data, remaining)| (data, Some(remaining))))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: value.to_vec(),
                expires_at: expiry_after(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        Ok(self.live(key).is_some())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl std::fmt::Debug for MemoryTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTier")
            .field("entries", &self.entries.len())
            .finish()
    }
}
