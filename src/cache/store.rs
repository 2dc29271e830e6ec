//! Generic TTL key-value store.
//!
//! Every entry carries a fixed deadline computed at write time. Reads never extend it.
//! Expired entries are dropped lazily on `get` (counted as a miss) or by the periodic
//! sweep (counted as an eviction), whichever comes first.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use super::lock::{rw_read, rw_write};
use super::stats::CacheStats;

const SOURCE: &str = "cache::store";

/// Upper bound applied to requested TTLs so deadline arithmetic cannot overflow.
const MAX_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 365);

struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    expires_at: Instant,
    accessed_at: Instant,
    hit_count: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            created_at: now,
            expires_at: now + ttl.min(MAX_TTL),
            accessed_at: now,
            hit_count: 0,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn info(&self) -> EntryInfo {
        EntryInfo {
            created_at: self.created_at,
            expires_at: self.expires_at,
            accessed_at: self.accessed_at,
            hit_count: self.hit_count,
        }
    }
}

/// Copy of an entry's bookkeeping, for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub created_at: Instant,
    pub expires_at: Instant,
    pub accessed_at: Instant,
    pub hit_count: u64,
}

impl EntryInfo {
    /// Lifetime granted at write time.
    pub fn ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(self.created_at)
    }
}

struct StoreState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
}

/// In-memory key-value store with per-entry expiration.
///
/// All state sits behind one `RwLock`. `get` takes the write side because a hit updates
/// the entry's access metadata and an expired hit removes the entry; statistics are
/// updated under that same guard.
pub struct TtlStore<V> {
    state: RwLock<StoreState<V>>,
}

impl<V: Clone> TtlStore<V> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a live entry, returning a clone of its value.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = rw_write(&self.state, SOURCE, "get");
        let state = &mut *guard;

        match state.entries.get_mut(key) {
            None => {
                state.stats.misses += 1;
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.accessed_at = now;
                entry.hit_count += 1;
                state.stats.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        state.entries.remove(key);
        state.stats.misses += 1;
        None
    }

    /// Insert or overwrite `key`. The deadline is fixed to `now + ttl`.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry::new(value, ttl, Instant::now());
        let mut state = rw_write(&self.state, SOURCE, "set");
        state.entries.insert(key.into(), entry);
        state.stats.total += 1;
    }

    /// Remove `key`. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut state = rw_write(&self.state, SOURCE, "delete");
        let removed = state.entries.remove(key).is_some();
        if removed {
            state.stats.evictions += 1;
        }
        removed
    }

    /// Drop every entry without touching the eviction counter.
    pub fn clear(&self) {
        rw_write(&self.state, SOURCE, "clear").entries.clear();
    }

    /// Number of entries that have not yet expired.
    pub fn size(&self) -> usize {
        let now = Instant::now();
        rw_read(&self.state, SOURCE, "size")
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }

    /// Whether a live entry exists for `key`. Does not affect statistics.
    pub fn exists(&self, key: &str) -> bool {
        let now = Instant::now();
        rw_read(&self.state, SOURCE, "exists")
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    pub fn stats(&self) -> CacheStats {
        rw_read(&self.state, SOURCE, "stats").stats
    }

    /// Bookkeeping for a live entry. Does not affect statistics.
    pub fn entry_info(&self, key: &str) -> Option<EntryInfo> {
        let now = Instant::now();
        rw_read(&self.state, SOURCE, "entry_info")
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(CacheEntry::info)
    }

    /// Keys of all live entries, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        rw_read(&self.state, SOURCE, "keys")
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Remove every expired entry, counting each as an eviction.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = rw_write(&self.state, SOURCE, "purge_expired");
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - state.entries.len();
        state.stats.evictions += removed as u64;
        removed
    }
}

impl<V: Clone> Default for TtlStore<V> {
    fn default() -> Self {
        Self::new()
    }
}
