//! Cross-cache invalidation facade.

use std::sync::Arc;

use metrics::counter;
use tracing::info;

use super::query::QueryCache;
use super::response::ResponseCache;

const METRIC_INVALIDATIONS: &str = "menu_cache_invalidation_total";

/// Outcome of invalidating one table across both caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Invalidated {
    pub responses: usize,
    pub queries: usize,
}

/// Invalidates the response and query caches together. Holds no state of its own.
#[derive(Clone)]
pub struct CacheInvalidator {
    responses: Arc<ResponseCache>,
    queries: Arc<QueryCache>,
}

impl CacheInvalidator {
    pub fn new(responses: Arc<ResponseCache>, queries: Arc<QueryCache>) -> Self {
        Self { responses, queries }
    }

    /// Flush everything.
    pub fn invalidate_all(&self) {
        self.responses.clear_all();
        self.queries.invalidate_all();
        counter!(METRIC_INVALIDATIONS, "scope" => "all").increment(1);
        info!("flushed response and query caches");
    }

    /// Drop query results depending on `table` and responses tagged with it.
    pub fn invalidate_table(&self, table: &str) -> Invalidated {
        let outcome = Invalidated {
            queries: self.queries.invalidate_table(table),
            responses: self.responses.invalidate_by_tag(table),
        };
        counter!(METRIC_INVALIDATIONS, "scope" => "table").increment(1);
        outcome
    }
}
