//! Debug route definitions

use crate::store::Store;
use axum::{Router, routing::get};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use super::handlers;

/// State shared across debug handlers
#[derive(Clone)]
pub struct DebugState {
    pub store: Store,
    pub prometheus_handle: metrics_exporter_prometheus::PrometheusHandle,
}

/// Create the debug router
pub fn create_router(state: DebugState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .route("/version", get(handlers::version))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
