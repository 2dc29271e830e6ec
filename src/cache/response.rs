//! HTTP response cache.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::Response,
};
use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::debug;

use super::keys;
use super::registry::TagIndex;
use super::stats::{CacheStats, StatsCounters};
use super::store::TtlStore;
use super::sweeper::Sweep;

pub(crate) const METRIC_RESPONSE_HIT: &str = "menu_cache_response_hit_total";
pub(crate) const METRIC_RESPONSE_MISS: &str = "menu_cache_response_miss_total";
pub(crate) const METRIC_RESPONSE_EVICT: &str = "menu_cache_response_evict_total";

/// A fully buffered response as it was produced by the downstream handler.
///
/// Immutable once stored; re-caching the same key replaces the whole value.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
    cached_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl CachedResponse {
    /// Capture status, headers (order and duplicates preserved) and body.
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Bytes) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            status,
            headers: headers
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            body,
            cached_at: now,
            expires_at: now,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn cached_at(&self) -> OffsetDateTime {
        self.cached_at
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    fn stamped(mut self, ttl: Duration) -> Self {
        let now = OffsetDateTime::now_utc();
        self.cached_at = now;
        self.expires_at = now + ttl;
        self
    }

    /// Rebuild an HTTP response from the stored representation.
    pub fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            headers.append(name, value);
        }

        response
    }
}

/// Aggregated response-cache statistics for the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total: u64,
    pub hit_rate: String,
    pub size: usize,
}

/// Response cache keyed by request fingerprint, with a tag index for invalidation.
pub struct ResponseCache {
    store: Arc<TtlStore<CachedResponse>>,
    tags: TagIndex,
    stats: StatsCounters,
}

impl ResponseCache {
    pub fn new(store: Arc<TtlStore<CachedResponse>>) -> Self {
        Self {
            store,
            tags: TagIndex::new(),
            stats: StatsCounters::default(),
        }
    }

    /// Fingerprint for a request; see [`keys::response_key`].
    pub fn generate_key(method: &str, path: &str, raw_query: &str) -> String {
        keys::response_key(method, path, raw_query)
    }

    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        match self.store.get(key) {
            Some(cached) => {
                self.stats.record_hit();
                counter!(METRIC_RESPONSE_HIT).increment(1);
                Some(cached)
            }
            None => {
                self.stats.record_miss();
                counter!(METRIC_RESPONSE_MISS).increment(1);
                None
            }
        }
    }

    /// Store `response` for `ttl` and file it under each of `tags`.
    pub fn set<I, S>(&self, key: &str, response: CachedResponse, ttl: Duration, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.set(key, response.stamped(ttl), ttl);
        // An overwrite replaces the previous tag set.
        self.tags.unregister_key(key);
        self.tags.register(key, tags);
        self.stats.record_insert();
    }

    /// Remove one entry and forget it in every tag bucket.
    pub fn invalidate_key(&self, key: &str) -> bool {
        let removed = self.store.delete(key);
        self.tags.unregister_key(key);
        if removed {
            self.record_evictions(1);
        }
        removed
    }

    /// Remove every entry filed under `tag`. Returns how many were actually present.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let removed = self
            .tags
            .take_tag(tag)
            .iter()
            .filter(|key| self.store.delete(key))
            .count();
        self.record_evictions(removed);
        debug!(cache = "response", tag, removed, "invalidated tag");
        removed
    }

    pub fn clear_all(&self) {
        self.tags.clear();
        self.store.clear();
    }

    pub fn size(&self) -> usize {
        self.store.size()
    }

    /// Number of tags that currently list at least one key.
    pub fn tag_count(&self) -> usize {
        self.tags.tag_count()
    }

    /// This layer's counters, independent of the backing store's.
    pub fn counters(&self) -> CacheStats {
        self.stats.snapshot()
    }

    /// Counters of the backing TTL store.
    pub fn store_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn stats(&self) -> ResponseCacheStats {
        let counters = self.counters();
        ResponseCacheStats {
            hits: counters.hits,
            misses: counters.misses,
            evictions: counters.evictions,
            total: counters.total,
            hit_rate: counters.hit_rate_display(),
            size: self.size(),
        }
    }

    fn record_evictions(&self, count: usize) {
        self.stats.record_evictions(count as u64);
        counter!(METRIC_RESPONSE_EVICT).increment(count as u64);
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(Arc::new(TtlStore::new()))
    }
}

impl Sweep for ResponseCache {
    fn name(&self) -> &'static str {
        "response"
    }

    fn sweep(&self) -> usize {
        let removed = self.store.purge_expired();
        self.tags.retain_keys(|key| self.store.exists(key));
        removed
    }
}
