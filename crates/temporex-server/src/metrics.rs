//! Metrics collection and export.
//!
//! Uses the `metrics` crate for instrumentation and exports to Prometheus.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use temporex_core::DeliveryReport;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "temporex_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "temporex_connections_active";
    pub const MESSAGES_TOTAL: &str = "temporex_messages_total";
    pub const MESSAGES_BYTES: &str = "temporex_messages_bytes";
    pub const SESSIONS_ACTIVE: &str = "temporex_sessions_active";
    pub const DELIVERIES_TOTAL: &str = "temporex_deliveries_total";
    pub const ROUTE_LATENCY_SECONDS: &str = "temporex_route_latency_seconds";
    pub const ERRORS_TOTAL: &str = "temporex_errors_total";
}

/// Describe every metric to the installed recorder.
///
/// Descriptions sent before a recorder is installed are dropped, so this runs
/// after the exporter is in place.
pub fn describe_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_gauge!(names::SESSIONS_ACTIVE, "Current number of live sessions");
    metrics::describe_counter!(
        names::DELIVERIES_TOTAL,
        "Per-recipient fan-out outcomes"
    );
    metrics::describe_histogram!(
        names::ROUTE_LATENCY_SECONDS,
        "Group fan-out latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics described");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    describe_metrics();

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record the outcome of one fan-out.
pub fn record_delivery(report: &DeliveryReport, seconds: f64) {
    counter!(names::DELIVERIES_TOTAL, "outcome" => "delivered")
        .increment(report.delivered_count() as u64);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "skipped")
        .increment(report.skipped_count() as u64);
    counter!(names::DELIVERIES_TOTAL, "outcome" => "failed")
        .increment(report.failed_count() as u64);
    histogram!(names::ROUTE_LATENCY_SECONDS).record(seconds);
}

/// Update the live session count.
pub fn set_active_sessions(count: usize) {
    gauge!(names::SESSIONS_ACTIVE).set(count as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that tracks one open connection.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::CONNECTIONS_TOTAL).increment(1);
        gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
    }
}
