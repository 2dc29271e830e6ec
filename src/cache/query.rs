//! Query-result cache with table dependencies.
//!
//! Results are keyed by the text of the logical query and declare the tables they were
//! computed from. A write to a table invalidates every result that depends on it.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tracing::debug;

use super::keys;
use super::registry::TagIndex;
use super::stats::{CacheStats, StatsCounters};
use super::store::TtlStore;
use super::sweeper::Sweep;

pub(crate) const METRIC_QUERY_HIT: &str = "menu_cache_query_hit_total";
pub(crate) const METRIC_QUERY_MISS: &str = "menu_cache_query_miss_total";
pub(crate) const METRIC_QUERY_EVICT: &str = "menu_cache_query_evict_total";

/// Aggregated query-cache statistics for the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total: u64,
    pub hit_rate: String,
    pub size: usize,
    pub tables: usize,
}

pub struct QueryCache<V = serde_json::Value> {
    store: Arc<TtlStore<V>>,
    dependencies: TagIndex,
    stats: StatsCounters,
}

impl<V: Clone> QueryCache<V> {
    pub fn new(store: Arc<TtlStore<V>>) -> Self {
        Self {
            store,
            dependencies: TagIndex::new(),
            stats: StatsCounters::default(),
        }
    }

    /// Fingerprint for a logical query; see [`keys::query_key`].
    pub fn generate_key(query: &str) -> String {
        keys::query_key(query)
    }

    pub fn get(&self, query: &str) -> Option<V> {
        let key = Self::generate_key(query);
        match self.store.get(&key) {
            Some(value) => {
                self.stats.record_hit();
                counter!(METRIC_QUERY_HIT).increment(1);
                Some(value)
            }
            None => {
                self.stats.record_miss();
                counter!(METRIC_QUERY_MISS).increment(1);
                None
            }
        }
    }

    /// Store `value` for `ttl`, recording that it was computed from `depends_on`.
    pub fn set<I, S>(&self, query: &str, value: V, ttl: Duration, depends_on: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = Self::generate_key(query);
        self.store.set(key.as_str(), value, ttl);
        self.dependencies.unregister_key(&key);
        self.dependencies.register(&key, depends_on);
        self.stats.record_insert();
    }

    /// Return the cached result or compute, store and return it.
    ///
    /// Loader errors are handed back untouched and nothing is stored.
    pub async fn get_or_try_insert_with<I, S, F, Fut, E>(
        &self,
        query: &str,
        ttl: Duration,
        depends_on: I,
        load: F,
    ) -> Result<V, E>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(query) {
            return Ok(value);
        }

        let value = load().await?;
        self.set(query, value.clone(), ttl, depends_on);
        Ok(value)
    }

    /// Drop every result that depends on `table`. Returns how many were present.
    ///
    /// Results that also depend on other tables stay listed under those tables; a later
    /// invalidation of one of them deletes an absent key, which is a no-op.
    pub fn invalidate_table(&self, table: &str) -> usize {
        let removed = self
            .dependencies
            .take_tag(table)
            .iter()
            .filter(|key| self.store.delete(key))
            .count();
        self.stats.record_evictions(removed as u64);
        counter!(METRIC_QUERY_EVICT).increment(removed as u64);
        debug!(cache = "query", table, removed, "invalidated table");
        removed
    }

    pub fn invalidate_all(&self) {
        self.dependencies.clear();
        self.store.clear();
    }

    pub fn size(&self) -> usize {
        self.store.size()
    }

    /// Number of tables with at least one dependent result.
    pub fn table_count(&self) -> usize {
        self.dependencies.tag_count()
    }

    /// This layer's counters, independent of the backing store's.
    pub fn counters(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Counters of the backing TTL store.
    pub fn store_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn stats(&self) -> QueryCacheStats {
        let counters = self.counters();
        QueryCacheStats {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            total: counters.total,
            hit_rate: counters.hit_rate_display(),
            size: self.size(),
            tables: self.table_count(),
        }
    }
}

impl<V: Clone> Default for QueryCache<V> {
    fn default() -> Self {
        Self::new(Arc::new(TtlStore::new()))
    }
}

impl<V> Sweep for QueryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "query"
    }

    fn sweep(&self) -> usize {
        let removed = self.store.purge_expired();
        self.dependencies.retain_keys(|key| self.store.exists(key));
        removed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[test]
    fn roundtrip_by_query_text() {
        let cache: QueryCache = QueryCache::default();
        cache.set("menus:active", json!([{"id": 1}]), TTL, ["menus"]);

        assert_eq!(cache.get("menus:active"), Some(json!([{"id": 1}])));
        assert_eq!(cache.get("menus:archived"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, "50.00%");
        assert_eq!(stats.tables, 1);
    }

    #[test]
    fn either_dependency_invalidates_the_result() {
        for table in ["users", "teams"] {
            let cache: QueryCache<u32> = QueryCache::default();
            cache.set("members", 3, TTL, ["users", "teams"]);

            assert_eq!(cache.invalidate_table(table), 1);
            assert_eq!(cache.get("members"), None);
        }
    }

    #[test]
    fn second_table_invalidation_is_a_harmless_no_op() {
        let cache: QueryCache<u32> = QueryCache::default();
        cache.set("members", 3, TTL, ["users", "teams"]);
        cache.set("teams:count", 2, TTL, ["teams"]);

        assert_eq!(cache.invalidate_table("users"), 1);
        // "members" is already gone; only "teams:count" is removed now.
        assert_eq!(cache.invalidate_table("teams"), 1);
        assert_eq!(cache.invalidate_table("teams"), 0);
        assert_eq!(cache.counters().evictions, 2);
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn invalidate_all_clears_results_and_graph() {
        let cache: QueryCache<u32> = QueryCache::default();
        cache.set("a", 1, TTL, ["menus"]);
        cache.set("b", 2, TTL, ["items"]);

        cache.invalidate_all();

        assert_eq!(cache.size(), 0);
        assert_eq!(cache.table_count(), 0);
    }

    #[test]
    fn keys_are_namespaced_apart_from_responses() {
        let key = QueryCache::<u32>::generate_key("GET:/api/menus?");
        assert!(key.starts_with("q:"));
    }

    #[tokio::test]
    async fn read_through_loads_once() {
        let cache: QueryCache<u32> = QueryCache::default();
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_try_insert_with("menus:count", TTL, ["menus"], || async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(12)
                })
                .await;
            assert_eq!(value, Ok(12));
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.table_count(), 1);
    }

    #[tokio::test]
    async fn read_through_does_not_cache_errors() {
        let cache: QueryCache<u32> = QueryCache::default();

        let failed = cache
            .get_or_try_insert_with("menus:count", TTL, ["menus"], || async {
                Err::<u32, _>("database unavailable")
            })
            .await;
        assert_eq!(failed, Err("database unavailable"));
        assert_eq!(cache.size(), 0);
        assert_eq!(cache.counters().total, 0);
    }
}
