use std::process;

use axum::{Router, routing::get};
use menu_cache::{
    cache::{CacheConfig, CacheState, SweeperHandle},
    config,
    error::AppError,
    infra::{error::InfraError, http, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let cache = CacheState::new(CacheConfig::from(&settings.cache));
    info!(
        enabled = cache.config.enabled,
        invalidation_rules = cache.config.invalidation.len(),
        route_rules = cache.config.routes.len(),
        "cache configured"
    );

    let sweepers = cache.spawn_sweepers();
    let result = serve_http(&settings, cache).await;
    stop_sweepers(sweepers, settings.server.graceful_shutdown).await;

    result
}

async fn serve_http(settings: &config::Settings, cache: CacheState) -> Result<(), AppError> {
    let router = http::build_router(cache, Router::new()).route("/healthz", get(healthz));

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(addr = %settings.server.addr, "listening");

    http::serve(
        listener,
        router,
        shutdown_signal(),
        settings.server.graceful_shutdown,
    )
    .await
    .map_err(AppError::from)
}

async fn stop_sweepers(sweepers: Vec<SweeperHandle>, grace: std::time::Duration) {
    for sweeper in sweepers {
        let name = sweeper.name();
        if tokio::time::timeout(grace, sweeper.shutdown()).await.is_err() {
            warn!(cache = name, "sweeper did not stop within the grace period");
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
