//! Prometheus metrics

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

/// Setup Prometheus metrics exporter
/// Returns a handle that can be used to retrieve metrics
pub fn setup_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    tracing::info!("Prometheus metrics exporter installed");

    Ok(handle)
}

/// Record a connection delivered to a route
pub fn record_connection_routed(route: &str) {
    metrics::counter!("mux_connections_total",
        "route" => route.to_string()
    )
    .increment(1);
}

/// Record a connection no matcher claimed
pub fn record_connection_unmatched() {
    metrics::counter!("mux_connections_unmatched_total").increment(1);
}

/// Record a connection dropped for staying silent too long
pub fn record_classification_timeout() {
    metrics::counter!("mux_classification_timeouts_total").increment(1);
}

/// Record any other classification failure
pub fn record_classification_error(reason: &'static str) {
    metrics::counter!("mux_classification_errors_total",
        "reason" => reason
    )
    .increment(1);
}

/// Record a shutdown step that failed
pub fn record_shutdown_step_failure(step: &'static str) {
    metrics::counter!("shutdown_step_failures_total",
        "step" => step
    )
    .increment(1);
}
