//! Hit/miss/eviction accounting shared by every cache layer.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Point-in-time counter snapshot for one cache layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Cumulative insertions, overwrites included.
    pub total: u64,
}

impl CacheStats {
    /// Number of lookups observed (hits plus misses).
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hit rate as a percentage in `0.0..=100.0`; zero when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64 * 100.0
    }

    /// Hit rate rendered with two decimals and a percent sign, e.g. `"66.67%"`.
    pub fn hit_rate_display(&self) -> String {
        format!("{:.2}%", self.hit_rate())
    }
}

/// Counters for the semantic layers (response and query caches).
///
/// The TTL store keeps its counters inside its locked state instead; these layers only
/// need monotonic increments.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    total: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_insert(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.fetch_add(count, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            total: self.total.load(Ordering::Relaxed),
        }
    }
}
