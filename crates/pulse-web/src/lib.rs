//! Web layer for Pulse
//!
//! Exposes HTTP ingestion (`/api/telemetry`), health/stats endpoints, and
//! the WebSocket streaming endpoint at `/ws`.

mod api;
mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use pulse_collect::Collector;
use pulse_core::metrics::SharedMetrics;
use pulse_stream::{BackpressureHandler, ConnectionManager, StreamHandler, StreamManager};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            // Use 0.0.0.0 for Docker compatibility
            host: "0.0.0.0".to_string(),
            port: 8686,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub collector: Arc<Collector>,
    pub stream_handler: Arc<StreamHandler>,
    pub streams: Arc<StreamManager>,
    pub connections: Arc<ConnectionManager>,
    pub backpressure: Arc<BackpressureHandler>,
    pub metrics: SharedMetrics,
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/telemetry", post(api::collect_single))
        .route("/api/telemetry/batch", post(api::collect_batch))
        .route("/api/health", get(api::health))
        .route("/api/stats", get(api::stats))
        .route("/api/streams", get(api::streams))
        .route("/api/connections", get(api::connections))
        .route("/ws", get(ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// Start the web server, serving until the process exits
pub async fn start_server(config: WebConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    info!("Pulse API listening on http://{addr}");
    info!("  - Ingestion at /api/telemetry");
    info!("  - WebSocket at /ws");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
