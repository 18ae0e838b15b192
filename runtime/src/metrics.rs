//! Prometheus metrics for the lifecycle engine.
//!
//! Metrics are recorded through the `metrics` facade everywhere in the
//! workspace; this module describes them and installs the Prometheus
//! exporter:
//! - Lifecycle operations (outcome and latency)
//! - Event Log appends and triple-write divergence
//! - Listener fan-out
//! - Outbound delivery
//! - Background jobs (expiry, escalation, retention)
//!
//! # Example
//!
//! ```rust,no_run
//! use intake_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.serve()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics exporter.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the scrape endpoint binds to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the recorder without an HTTP listener.
    ///
    /// Metrics are then rendered on demand with [`render`](Self::render),
    /// e.g. from an existing HTTP router.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        match builder()?.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Install the recorder and serve `/metrics` on the configured address.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built, installed or bound.
    pub fn serve(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        builder()?
            .with_http_listener(self.addr)
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` unless [`start`](Self::start) installed the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn builder() -> Result<PrometheusBuilder, MetricsError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            LATENCY_BUCKETS,
        )
        .map_err(|e| MetricsError::Build(e.to_string()))
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Lifecycle
    describe_counter!(
        "lifecycle_operations_total",
        "Lifecycle Manager calls by operation and outcome (ok or error code)"
    );
    describe_histogram!(
        "lifecycle_operation_duration_seconds",
        "Time taken by Lifecycle Manager calls"
    );
    describe_counter!(
        "submissions_created_total",
        "Submissions created, by intake"
    );
    describe_counter!(
        "lifecycle_reconciled_events_total",
        "Event Log entries replayed into lagging snapshots"
    );

    // Event Log / triple-write
    describe_counter!(
        "event_log_appends_total",
        "Events appended to the Event Log, by event type"
    );
    describe_counter!(
        "event_log_append_failures_total",
        "Event Log appends that failed during a triple-write"
    );
    describe_counter!(
        "snapshot_save_failures_total",
        "Snapshot saves that failed after the Event Log append"
    );
    describe_counter!(
        "event_log_conflicts_total",
        "Appends refused by a relational backend's expected-version check, by backend"
    );

    // Fan-out
    describe_counter!(
        "listener_failures_total",
        "Event listener failures, by listener"
    );
    describe_histogram!(
        "listener_fanout_duration_seconds",
        "Time taken to hand one event to all listeners"
    );

    // Delivery
    describe_counter!(
        "delivery_attempts_total",
        "Outbound delivery attempts, by outcome"
    );
    describe_counter!(
        "delivery_rejected_destinations_total",
        "Deliveries refused by the destination guard"
    );
    describe_histogram!(
        "delivery_attempt_duration_seconds",
        "Time taken by one outbound delivery attempt"
    );
    describe_gauge!(
        "delivery_queue_depth",
        "Delivery jobs waiting for the worker"
    );

    // Background jobs
    describe_counter!(
        "submissions_expired_total",
        "Submissions moved to expired"
    );
    describe_counter!(
        "reviews_escalated_total",
        "Review escalations recorded"
    );
    describe_counter!(
        "events_purged_total",
        "Events deleted by the retention job"
    );
    describe_histogram!(
        "scheduler_scan_duration_seconds",
        "Time taken by one background scan"
    );
}

/// Lifecycle operation metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record one Lifecycle Manager call.
    pub fn record_operation(operation: &'static str, outcome: &'static str, duration: Duration) {
        counter!("lifecycle_operations_total", "operation" => operation, "outcome" => outcome)
            .increment(1);
        histogram!("lifecycle_operation_duration_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }
}

/// Delivery metrics recorder.
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record one delivery attempt.
    pub fn record_attempt(outcome: &'static str, duration: Duration) {
        counter!("delivery_attempts_total", "outcome" => outcome).increment(1);
        histogram!("delivery_attempt_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a destination refused before any network call.
    pub fn record_rejected_destination() {
        counter!("delivery_rejected_destinations_total").increment(1);
    }

    /// Record the number of queued delivery jobs.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_queue_depth(depth: usize) {
        gauge!("delivery_queue_depth").set(depth as f64);
    }
}

/// Background job metrics recorder.
pub struct SchedulerMetrics;

impl SchedulerMetrics {
    /// Record one scan.
    pub fn record_scan(job: &'static str, duration: Duration) {
        histogram!("scheduler_scan_duration_seconds", "job" => job).record(duration.as_secs_f64());
    }

    /// Record purged events.
    pub fn record_purged(count: u64) {
        counter!("events_purged_total").increment(count);
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:0".parse().expect("valid address")
    }

    #[test]
    fn server_starts_without_handle() {
        let server = MetricsServer::new(addr());
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn start_tolerates_an_installed_recorder() {
        let mut first = MetricsServer::new(addr());
        first.start().expect("first start");
        let mut second = MetricsServer::new(addr());
        assert!(second.start().is_ok());
    }

    #[test]
    fn rendered_output_contains_recorded_metrics() {
        let mut server = MetricsServer::new(addr());
        server.start().expect("start");

        LifecycleMetrics::record_operation("create", "ok", Duration::from_millis(3));
        DeliveryMetrics::record_attempt("succeeded", Duration::from_millis(40));
        SchedulerMetrics::record_purged(2);

        // Another test may own the recorder; metrics are still recorded then.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("lifecycle_operations_total"));
            assert!(rendered.contains("delivery_attempts_total"));
            assert!(rendered.contains("events_purged_total"));
        }
    }
}
