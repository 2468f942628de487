//! Cache metrics.
//!
//! Only records through the `metrics` facade; installing an exporter is up
//! to the host process.

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_COMPUTATIONS_TOTAL: &str = "cache_computations_total";
    pub const CACHE_LOCK_TIMEOUTS_TOTAL: &str = "cache_lock_timeouts_total";
    pub const CACHE_LOCK_WAIT_SECONDS: &str = "cache_lock_wait_seconds";
    pub const CACHE_CORRUPTED_ENTRIES_TOTAL: &str = "cache_corrupted_entries_total";
}

/// Record a cache hit.
pub fn record_cache_hit(tier: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "tier" => tier).increment(1);
}

/// Record a cache miss.
pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

/// Record an invocation of a caller-supplied computation.
pub fn record_computation() {
    counter!(names::CACHE_COMPUTATIONS_TOTAL).increment(1);
}

pub fn record_lock_wait(waited: Duration, acquired: bool) {
    histogram!(names::CACHE_LOCK_WAIT_SECONDS).record(waited.as_secs_f64());
    if !acquired {
        counter!(names::CACHE_LOCK_TIMEOUTS_TOTAL).increment(1);
    }
}

pub fn record_corrupted_entry(tier: &'static str) {
    counter!(names::CACHE_CORRUPTED_ENTRIES_TOTAL, "tier" => tier).increment(1);
}
