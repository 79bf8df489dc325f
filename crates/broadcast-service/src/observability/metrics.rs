//! Metrics definitions for the broadcast service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `bs_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `outcome`: 3 values (success, gone, transient)
//! - `event`: 3 values (insert, modify, remove) plus `unknown`
//! - `status`: 3 values (success, skipped, error)
//! - `operation`: 6 values (save, deactivate, list_active, xreadgroup, xautoclaim, xack)
//!
//! Connection, meeting and participant IDs are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Fan-out latency: one registry read plus concurrent pushes
        .set_buckets_for_metric(
            Matcher::Prefix("bs_broadcast".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set broadcast duration buckets: {e}"))?
        // Redis latency buckets - internal service call
        .set_buckets_for_metric(
            Matcher::Prefix("bs_redis".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set Redis latency buckets: {e}"))?
        // Fan-out width: connections per meeting
        .set_buckets_for_metric(
            Matcher::Full("bs_fanout_targets".to_string()),
            &[0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0],
        )
        .map_err(|e| format!("Failed to set fan-out buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Connections
// ============================================================================

/// Set the number of WebSocket sessions live on this instance.
///
/// Metric: `bs_connections_active`
/// Labels: none
pub fn set_connections_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("bs_connections_active").set(count as f64);
}

// ============================================================================
// Fan-out
// ============================================================================

/// Record the outcome of a single push.
///
/// Metric: `bs_push_total`
/// Labels: `outcome` (success, gone, transient)
pub fn record_push(outcome: &'static str) {
    counter!("bs_push_total", "outcome" => outcome).increment(1);
}

/// Record a completed fan-out.
///
/// Metrics: `bs_fanout_targets` (histogram), `bs_broadcast_duration_seconds` (histogram)
/// Labels: none
pub fn record_fanout(targets: usize, duration: Duration) {
    #[allow(clippy::cast_precision_loss)]
    histogram!("bs_fanout_targets").record(targets as f64);
    histogram!("bs_broadcast_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Change feed
// ============================================================================

/// Record processing of one change-feed record.
///
/// Metric: `bs_feed_records_total`
/// Labels: `event` (insert, modify, remove, unknown), `status` (success, skipped, error)
pub fn record_feed_record(event: &'static str, status: &'static str) {
    counter!("bs_feed_records_total", "event" => event, "status" => status).increment(1);
}

// ============================================================================
// Storage
// ============================================================================

/// Record Redis operation latency.
///
/// Metric: `bs_redis_latency_seconds`
/// Labels: `operation` (save, deactivate, list_active, xreadgroup, xautoclaim, xack)
pub fn record_redis_latency(operation: &'static str, duration: Duration) {
    histogram!("bs_redis_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}
