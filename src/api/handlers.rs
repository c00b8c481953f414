//! Debug endpoint handlers

use super::models::{HealthResponse, ReadyResponse, VersionResponse};
use super::routes::DebugState;
use axum::{Json, extract::State, http::StatusCode};
use std::time::Duration;

/// Upper bound on the store round trip behind `/ready`
pub const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// GET /health - Process liveness
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now(),
        }),
    )
}

/// GET /ready - Store reachability
pub async fn ready(State(state): State<DebugState>) -> (StatusCode, Json<ReadyResponse>) {
    let error = match tokio::time::timeout(READY_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!("store ping timed out after {:?}", READY_TIMEOUT)),
    };

    match error {
        None => (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready".to_string(),
                error: None,
            }),
        ),
        Some(error) => {
            tracing::warn!(error = %error, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    status: "unavailable".to_string(),
                    error: Some(error),
                }),
            )
        }
    }
}

/// GET /metrics - Prometheus metrics
pub async fn metrics(State(state): State<DebugState>) -> String {
    state.prometheus_handle.render()
}

/// GET /version - Crate name and version
pub async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
