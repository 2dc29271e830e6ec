//! Response caching and cache invalidation middleware.
//!
//! Both layers share one [`CacheState`] and are installed with
//! `axum::middleware::from_fn_with_state`. The invalidation layer should wrap the
//! caching layer so a mutation is fully handled before any follow-up read is cached.

use std::sync::Arc;

use axum::{
    body::{Body, HttpBody as _},
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig, CacheInvalidator, CachedResponse, QueryCache, ResponseCache,
    config::{InvalidationRule, RouteTags},
    sweeper::SweeperHandle,
};

pub const X_CACHE: &str = "x-cache";
pub const X_CACHE_DATE: &str = "x-cache-date";

const CACHEABLE_STATUSES: [StatusCode; 4] = [
    StatusCode::OK,
    StatusCode::CREATED,
    StatusCode::NO_CONTENT,
    StatusCode::PARTIAL_CONTENT,
];

/// Shared cache state for middleware and the admin routes.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub responses: Arc<ResponseCache>,
    pub queries: Arc<QueryCache>,
    pub invalidator: CacheInvalidator,
}

impl CacheState {
    /// Fresh caches, each on its own store.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_caches(
            config,
            Arc::new(ResponseCache::default()),
            Arc::new(QueryCache::default()),
        )
    }

    pub fn with_caches(
        config: CacheConfig,
        responses: Arc<ResponseCache>,
        queries: Arc<QueryCache>,
    ) -> Self {
        let invalidator = CacheInvalidator::new(Arc::clone(&responses), Arc::clone(&queries));
        Self {
            config: Arc::new(config),
            responses,
            queries,
            invalidator,
        }
    }

    /// Mutations of paths containing `pattern` invalidate `tables`.
    ///
    /// Intended for startup wiring, before the state is cloned into the router.
    pub fn register_invalidation_pattern<I, S>(&mut self, pattern: &str, tables: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.config)
            .invalidation
            .push(InvalidationRule {
                pattern: pattern.to_string(),
                tables: tables.into_iter().map(Into::into).collect(),
            });
    }

    /// Responses cached for paths containing `pattern` are tagged with `tags`.
    pub fn register_route_tags<I, S>(&mut self, pattern: &str, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::make_mut(&mut self.config).routes.push(RouteTags {
            pattern: pattern.to_string(),
            tags: tags.into_iter().map(Into::into).collect(),
        });
    }

    pub fn tables_for(&self, path: &str) -> Vec<&str> {
        self.config.tables_for(path)
    }

    pub fn tags_for(&self, path: &str) -> Vec<&str> {
        self.config.tags_for(path)
    }

    /// Start one sweeper per cache at the configured interval.
    pub fn spawn_sweepers(&self) -> Vec<SweeperHandle> {
        let every = self.config.sweep_interval;
        vec![
            SweeperHandle::spawn(Arc::clone(&self.responses), every),
            SweeperHandle::spawn(Arc::clone(&self.queries), every),
        ]
    }
}

/// Middleware for response caching.
///
/// Serves GET and HEAD requests from the response cache and stores successful,
/// fully buffered responses on a miss.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn response_cache_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !cache.config.enabled {
        return next.run(request).await;
    }

    let method = request.method();
    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    let key = ResponseCache::generate_key(
        method.as_str(),
        &path,
        request.uri().query().unwrap_or(""),
    );

    if let Some(cached) = cache.responses.get(&key) {
        debug!(cache = "response", outcome = "hit", "serving cached response");
        return replay(cached);
    }

    debug!(
        cache = "response",
        outcome = "miss",
        "cache miss, executing handler"
    );

    let mut response = next.run(request).await;

    if !should_store(&response, cache.config.max_body_bytes) {
        debug!(
            cache = "response",
            status = response.status().as_u16(),
            "response not cacheable"
        );
        mark_miss(response.headers_mut());
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            warn!(cache = "response", error = %error, "failed to buffer response body");
            let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
            mark_miss(response.headers_mut());
            return response;
        }
    };

    let tags = cache.tags_for(&path);
    debug!(
        cache = "response",
        tags = tags.len(),
        bytes = bytes.len(),
        "caching response"
    );
    cache.responses.set(
        &key,
        CachedResponse::new(parts.status, &parts.headers, bytes.clone()),
        cache.config.response_ttl,
        tags,
    );

    mark_miss(&mut parts.headers);
    Response::from_parts(parts, Body::from(bytes))
}

fn mark_miss(headers: &mut HeaderMap) {
    headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
}

/// Middleware for cache invalidation.
///
/// Runs the handler first, then invalidates every table mapped to the path of a
/// mutating request, whatever the response status.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn cache_invalidation_layer(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mutating = is_mutation(request.method());
    let path = request.uri().path().to_string();

    let response = next.run(request).await;

    if mutating {
        for table in cache.tables_for(&path) {
            let outcome = cache.invalidator.invalidate_table(table);
            debug!(
                table,
                responses = outcome.responses,
                queries = outcome.queries,
                status = response.status().as_u16(),
                "invalidated after mutation"
            );
        }
    }

    response
}

fn is_mutation(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    )
}

fn should_store(response: &Response, max_body_bytes: usize) -> bool {
    if !CACHEABLE_STATUSES.contains(&response.status()) {
        return false;
    }

    let headers = response.headers();
    if headers.contains_key(header::SET_COOKIE) {
        return false;
    }

    let streaming = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"));
    if streaming {
        return false;
    }

    // Unbounded bodies are streamed through.
    response
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= max_body_bytes as u64)
}

fn replay(cached: CachedResponse) -> Response {
    let cached_at = cached.cached_at().format(&Rfc3339).ok();
    let mut response = cached.into_response();

    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    if let Some(value) = cached_at.and_then(|date| HeaderValue::from_str(&date).ok()) {
        headers.insert(X_CACHE_DATE, value);
    }

    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{
        Router,
        middleware::from_fn_with_state,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;

    fn state() -> CacheState {
        let mut state = CacheState::new(CacheConfig::default());
        state.register_route_tags("/api/menus", ["menus"]);
        state.register_invalidation_pattern("/api/menus", ["menus"]);
        state
    }

    fn router(state: CacheState, calls: Arc<AtomicUsize>) -> Router {
        let counted = move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                format!("call {n}")
            }
        };
        Router::new()
            .route("/api/menus", get(counted.clone()).post(counted))
            .route("/cookie", get(|| async { ([(header::SET_COOKIE, "a=b")], "hi") }))
            .route(
                "/missing",
                get(|| async { (StatusCode::NOT_FOUND, "nope") }),
            )
            .layer(from_fn_with_state(state.clone(), response_cache_layer))
            .layer(from_fn_with_state(state, cache_invalidation_layer))
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn body_text(response: Response) -> String {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    #[tokio::test]
    async fn second_get_is_served_from_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = router(state(), Arc::clone(&calls));

        let first = app
            .clone()
            .oneshot(request(Method::GET, "/api/menus"))
            .await
            .expect("first");
        assert_eq!(first.headers()[X_CACHE], "MISS");
        assert!(first.headers().get(X_CACHE_DATE).is_none());
        assert_eq!(body_text(first).await, "call 1");

        let second = app
            .oneshot(request(Method::GET, "/api/menus"))
            .await
            .expect("second");
        assert_eq!(second.headers()[X_CACHE], "HIT");
        assert!(second.headers().get(X_CACHE_DATE).is_some());
        assert_eq!(body_text(second).await, "call 1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_string_is_part_of_the_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = router(state(), Arc::clone(&calls));

        for uri in ["/api/menus?page=1", "/api/menus?page=2"] {
            let response = app
                .clone()
                .oneshot(request(Method::GET, uri))
                .await
                .expect("response");
            assert_eq!(response.headers()[X_CACHE], "MISS");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn post_is_never_cached_and_invalidates_tagged_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = state();
        let app = router(state.clone(), Arc::clone(&calls));

        app.clone()
            .oneshot(request(Method::GET, "/api/menus"))
            .await
            .expect("warm");
        assert_eq!(state.responses.size(), 1);

        let posted = app
            .clone()
            .oneshot(request(Method::POST, "/api/menus"))
            .await
            .expect("post");
        assert!(posted.headers().get(X_CACHE).is_none());
        assert_eq!(state.responses.size(), 0);

        let reread = app
            .oneshot(request(Method::GET, "/api/menus"))
            .await
            .expect("reread");
        assert_eq!(reread.headers()[X_CACHE], "MISS");
        assert_eq!(body_text(reread).await, "call 3");
    }

    #[tokio::test]
    async fn uncacheable_responses_pass_through_marked_as_misses() {
        let state = state();
        let app = router(state.clone(), Arc::new(AtomicUsize::new(0)));

        for uri in ["/cookie", "/missing", "/cookie", "/missing"] {
            let response = app
                .clone()
                .oneshot(request(Method::GET, uri))
                .await
                .expect("response");
            assert_eq!(response.headers()[X_CACHE], "MISS");
            assert!(response.headers().get(X_CACHE_DATE).is_none());
        }
        assert_eq!(state.responses.size(), 0);
    }

    #[tokio::test]
    async fn disabled_cache_passes_everything_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let state = CacheState::new(CacheConfig {
            enabled: false,
            ..Default::default()
        });
        let app = router(state.clone(), Arc::clone(&calls));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request(Method::GET, "/api/menus"))
                .await
                .expect("response");
            assert!(response.headers().get(X_CACHE).is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.responses.size(), 0);
    }

    #[test]
    fn registration_copies_on_write() {
        let original = CacheState::new(CacheConfig::default());
        let mut extended = original.clone();
        extended.register_invalidation_pattern("/api/items", ["items"]);

        assert!(original.tables_for("/api/items").is_empty());
        assert_eq!(extended.tables_for("/api/items/3"), vec!["items"]);
        assert!(Arc::ptr_eq(&original.responses, &extended.responses));
    }

    #[test]
    fn only_mutating_methods_invalidate() {
        assert!(is_mutation(&Method::POST));
        assert!(is_mutation(&Method::PUT));
        assert!(is_mutation(&Method::DELETE));
        assert!(is_mutation(&Method::PATCH));
        assert!(!is_mutation(&Method::GET));
        assert!(!is_mutation(&Method::HEAD));
        assert!(!is_mutation(&Method::OPTIONS));
    }

    #[tokio::test]
    async fn spawns_one_sweeper_per_cache() {
        let handles = state().spawn_sweepers();
        let names: Vec<_> = handles.iter().map(SweeperHandle::name).collect();
        assert_eq!(names, ["response", "query"]);
        for handle in handles {
            handle.shutdown().await;
        }
    }
}
