//! REST API handlers

use crate::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use pulse_collect::CollectOutcome;
use pulse_core::error::TelemetryError;
use std::sync::Arc;

fn outcome_json(outcome: &CollectOutcome) -> serde_json::Value {
    let status = match outcome {
        CollectOutcome::Accepted(_) => "accepted",
        CollectOutcome::Deduplicated(_) => "deduplicated",
    };
    serde_json::json!({ "id": outcome.id(), "status": status })
}

fn error_response(e: TelemetryError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        TelemetryError::Validation { .. } => StatusCode::BAD_REQUEST,
        TelemetryError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        TelemetryError::Batch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        TelemetryError::Resource { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = serde_json::json!({
        "error": e.to_string(),
        "code": e.code(),
        "retryable": e.is_retryable(),
    });
    (status, Json(body))
}

/// POST /api/telemetry
pub async fn collect_single(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<serde_json::Value>,
) -> impl IntoResponse {
    match state.collector.collect_json(raw).await {
        Ok(outcome) => (StatusCode::ACCEPTED, Json(outcome_json(&outcome))).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// POST /api/telemetry/batch
pub async fn collect_batch(
    State(state): State<Arc<AppState>>,
    Json(items): Json<Vec<serde_json::Value>>,
) -> impl IntoResponse {
    let submitted = items.len();
    match state.collector.collect_batch(items).await {
        Ok(outcomes) => {
            let body = serde_json::json!({
                "submitted": submitted,
                "collected": outcomes.len(),
                "outcomes": outcomes.iter().map(outcome_json).collect::<Vec<_>>(),
            });
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let backpressure = state.backpressure.stats().await;
    Json(serde_json::json!({
        "status": "healthy",
        "service": "pulse",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.metrics.uptime_seconds(),
        "load_level": backpressure.load_level,
        "drop_rate": backpressure.drop_rate,
    }))
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut body = state.metrics.to_json();
    if let Some(map) = body.as_object_mut() {
        if let Ok(backpressure) = serde_json::to_value(state.backpressure.stats().await) {
            map.insert("backpressure_detail".to_string(), backpressure);
        }
    }
    Json(body)
}

/// GET /api/streams
pub async fn streams(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.streams.to_json().await)
}

/// GET /api/connections
pub async fn connections(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.connections.to_json().await)
}
