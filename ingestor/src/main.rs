mod errors;
mod metrics;
mod model;
mod rest;
mod store;
mod validate;

use anyhow::Context;
use axum::{routing::get, Router};
use std::env;
use store::TrackerRegistry;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let http_addr = env::var("HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting tracker ingestor");
    info!("HTTP server: {}", http_addr);

    // Initialize metrics
    metrics::init_metrics();

    let registry = TrackerRegistry::new();

    // Build HTTP app with REST API and metrics endpoint
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .merge(rest::create_router(registry));

    let listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", http_addr))?;

    info!("HTTP server listening on {}", http_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received shutdown signal");
    }
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}
