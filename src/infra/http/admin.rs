use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use tracing::info;

use crate::cache::{CacheState, QueryCacheStats, ResponseCacheStats};

#[derive(Debug, Serialize)]
pub struct CacheStatsBody {
    pub response_cache: ResponseCacheStats,
    pub query_cache: QueryCacheStats,
}

#[derive(Debug, Serialize)]
pub struct CacheStatusBody {
    pub enabled: bool,
    pub response_cache_size: usize,
    pub query_cache_size: usize,
    pub response_hit_rate: String,
    pub query_hit_rate: String,
    pub tracked_tables: usize,
    pub response_ttl_seconds: u64,
    pub query_ttl_seconds: u64,
}

pub(super) fn router(cache: CacheState) -> Router {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(clear_cache))
        .route("/cache/status", get(cache_status))
        .with_state(cache)
}

async fn cache_stats(State(cache): State<CacheState>) -> Json<CacheStatsBody> {
    Json(CacheStatsBody {
        response_cache: cache.responses.stats(),
        query_cache: cache.queries.stats(),
    })
}

async fn clear_cache(State(cache): State<CacheState>) -> Response {
    cache.invalidator.invalidate_all();
    info!(source = "admin", "cache cleared on request");
    StatusCode::OK.into_response()
}

async fn cache_status(State(cache): State<CacheState>) -> Json<CacheStatusBody> {
    let responses = cache.responses.stats();
    let queries = cache.queries.stats();

    Json(CacheStatusBody {
        enabled: cache.config.enabled,
        response_cache_size: responses.size,
        query_cache_size: queries.size,
        response_hit_rate: responses.hit_rate,
        query_hit_rate: queries.hit_rate,
        tracked_tables: queries.tables,
        response_ttl_seconds: cache.config.response_ttl.as_secs(),
        query_ttl_seconds: cache.config.query_ttl.as_secs(),
    })
}
