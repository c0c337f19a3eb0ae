/// Metrics and health endpoint
use crate::{
    error::{WardenError, WardenResult},
    metrics,
};
use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Build the router exposing `/metrics` and `/health`
pub fn build_router() -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found)
}

/// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Prometheus text exposition
async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Bind the metrics listener
pub async fn bind(addr: &str) -> WardenResult<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|e| WardenError::Internal(format!("Failed to bind to {}: {}", addr, e)))
}

/// Serve the metrics router until `shutdown` flips
pub async fn serve(listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> WardenResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Metrics listening on http://{}/metrics", addr);
    }

    axum::serve(listener, build_router())
        .with_graceful_shutdown(async move {
            // A dropped sender also ends the server
            let _ = shutdown.changed().await;
        })
        .await
        .map_err(|e| WardenError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
