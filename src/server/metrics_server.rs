// src/server/metrics_server.rs

use crate::core::metrics::gather_metrics;
use crate::core::state::ServerContext;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Handles HTTP requests to the /metrics endpoint.
async fn metrics_handler() -> impl IntoResponse {
    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Lists every registered connection with its monitor summary, plus the
/// listener statistics.
async fn connections_handler(State(context): State<Arc<ServerContext>>) -> impl IntoResponse {
    let connections: Vec<String> = context
        .connections()
        .iter()
        .map(|c| c.monitor_summary())
        .collect();
    Json(json!({
        "count": connections.len(),
        "connections": connections,
        "statistics": context.stats.snapshot(),
    }))
}

/// Replaces the log filter with the directives in the request body.
async fn log_level_handler(
    State(context): State<Arc<ServerContext>>,
    body: String,
) -> impl IntoResponse {
    match context.set_log_level(body.trim()) {
        Ok(()) => (StatusCode::OK, "OK".to_string()),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// Builds the monitoring router.
pub fn router(context: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/connections", get(connections_handler))
        .route("/log_level", post(log_level_handler))
        .with_state(context)
}

/// Runs a small HTTP server exposing Prometheus metrics and connection
/// monitoring.
pub async fn run_metrics_server(
    context: Arc<ServerContext>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), anyhow::Error> {
    let app = router(context);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Prometheus metrics server listening on http://{}/metrics", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on port {}: {}", port, e);
            return Ok(());
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("Metrics server shutting down.");
        })
        .await?;
    Ok(())
}
