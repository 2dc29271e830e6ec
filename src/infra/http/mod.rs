//! HTTP surface: wraps application routes in the cache layers and mounts the cache admin
//! endpoints beside them.

mod admin;

use std::future::{Future, IntoFuture};
use std::time::Duration;

use axum::{Router, middleware};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

use crate::cache::{CacheState, cache_invalidation_layer, response_cache_layer};
use crate::infra::error::InfraError;

pub use admin::{CacheStatsBody, CacheStatusBody};

/// Wrap `app` in the caching and invalidation layers and merge the `/cache/*` routes.
///
/// The admin routes are merged after layering, so they are never cached and never
/// trigger invalidation themselves.
pub fn build_router(cache: CacheState, app: Router) -> Router {
    let cached = app
        .layer(middleware::from_fn_with_state(
            cache.clone(),
            response_cache_layer,
        ))
        .layer(middleware::from_fn_with_state(
            cache.clone(),
            cache_invalidation_layer,
        ));

    cached.merge(admin::router(cache))
}

/// Serve `router` until `signal` resolves, then drain open connections for at most `grace`.
///
/// Connections still open when the grace period ends are dropped.
pub async fn serve<F>(
    listener: TcpListener,
    router: Router,
    signal: F,
    grace: Duration,
) -> Result<(), InfraError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (draining_tx, mut draining_rx) = watch::channel(false);

    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            signal.await;
            info!(grace_ms = grace.as_millis() as u64, "draining connections");
            let _ = draining_tx.send(true);
        })
        .into_future();

    let deadline = async move {
        if draining_rx.wait_for(|draining| *draining).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => result.map_err(InfraError::from),
        () = deadline => {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "connections still open after the grace period, closing them"
            );
            Ok(())
        }
    }
}
