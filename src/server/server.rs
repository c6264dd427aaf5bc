use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::metrics::metrics_handler;
use super::{log_requests, match_routes::match_routes, state::*, ServerConfig};

pub const READY_MESSAGE: &str =
    "ADX-Backend is ready to receive audio chunks and fingerprints. Up and Ready!";

async fn home() -> &'static str {
    READY_MESSAGE
}

pub fn make_app(config: ServerConfig, coordinator: GuardedMatchCoordinator) -> Router {
    let state = ServerState::new(config.clone(), coordinator);

    Router::new()
        .route("/", get(home))
        .merge(match_routes(config.max_upload_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serve the API and the metrics endpoint until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    coordinator: GuardedMatchCoordinator,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let app = make_app(config, coordinator);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Listening on {}", listener.local_addr()?);

    let metrics_shutdown = shutdown.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, make_metrics_app())
            .with_graceful_shutdown(metrics_shutdown.cancelled_owned())
            .await
    });

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    metrics_server
        .await
        .context("Metrics server task panicked")??;
    Ok(())
}
