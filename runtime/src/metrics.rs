//! Prometheus metrics for the registration engine.
//!
//! Metric descriptions are registered by [`MetricsServer::start`] once its
//! recorder is installed; the recorder structs below are thin wrappers around
//! the `metrics` macros so call sites never spell metric names by hand. Without an installed recorder the
//! macros are no-ops, which keeps tests free of global state.
//!
//! # Example
//!
//! ```rust,no_run
//! use rollcall_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Serve metrics on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use crate::{NoShowReport, SweepReport};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Install the Prometheus recorder and start serving `/metrics`.
    ///
    /// Must be called from within a tokio runtime; the HTTP exporter runs as a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (e.g. the address cannot
    /// be bound).
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests) this logs a warning
    /// and leaves the existing recorder in place.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }
        // Descriptions only reach the recorder installed at the time of the call
        register_metrics();

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Metrics server started");
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "rollcall_registrations_total",
        "Registration requests by outcome (registered, waitlisted, replayed, rejected)"
    );

    describe_counter!(
        "rollcall_promotions_offered_total",
        "Promotion offers made to the waitlist head"
    );
    describe_counter!(
        "rollcall_promotions_accepted_total",
        "Promotion offers accepted before their deadline"
    );
    describe_counter!(
        "rollcall_promotions_declined_total",
        "Promotion offers declined or cancelled by the holder"
    );
    describe_counter!(
        "rollcall_promotions_expired_total",
        "Promotion offers expired by the sweep"
    );

    describe_counter!(
        "rollcall_conflicts_retried_total",
        "Optimistic update conflicts that were retried"
    );
    describe_counter!(
        "rollcall_conflicts_exhausted_total",
        "Operations that ran out of retries"
    );

    describe_counter!(
        "rollcall_events_published_total",
        "Domain events handed to the dispatcher"
    );
    describe_counter!(
        "rollcall_publish_failures_total",
        "Domain events the dispatcher rejected"
    );

    describe_counter!(
        "rollcall_no_shows_total",
        "Registrations marked as no-show"
    );
    describe_counter!(
        "rollcall_sweep_failures_total",
        "Records a sweep could not process"
    );
    describe_histogram!(
        "rollcall_sweep_duration_seconds",
        "Time taken by one expiry sweep"
    );
}

/// Registration metrics recorder.
pub struct RegistrationMetrics;

impl RegistrationMetrics {
    /// Record the outcome of one `register_for_event` call.
    pub fn record_outcome(outcome: &'static str) {
        counter!("rollcall_registrations_total", "outcome" => outcome).increment(1);
    }
}

/// Promotion metrics recorder.
pub struct PromotionMetrics;

impl PromotionMetrics {
    /// Record an offer to the waitlist head.
    pub fn record_offered() {
        counter!("rollcall_promotions_offered_total").increment(1);
    }

    /// Record an accepted offer.
    pub fn record_accepted() {
        counter!("rollcall_promotions_accepted_total").increment(1);
    }

    /// Record a declined offer.
    pub fn record_declined() {
        counter!("rollcall_promotions_declined_total").increment(1);
    }

    /// Record an expired offer.
    pub fn record_expired() {
        counter!("rollcall_promotions_expired_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retried conflict.
    pub fn record_attempt() {
        counter!("rollcall_conflicts_retried_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("rollcall_conflicts_exhausted_total").increment(1);
    }
}

/// Domain event publish metrics recorder.
pub struct PublishMetrics;

impl PublishMetrics {
    /// Record a successful hand-off.
    pub fn record_published(kind: &'static str) {
        counter!("rollcall_events_published_total", "kind" => kind).increment(1);
    }

    /// Record a failed hand-off.
    pub fn record_failure(kind: &'static str) {
        counter!("rollcall_publish_failures_total", "kind" => kind).increment(1);
    }
}

/// Sweep metrics recorder.
pub struct SweepMetrics;

impl SweepMetrics {
    /// Record one expiry sweep.
    pub fn record_expiry_sweep(report: &SweepReport, duration: Duration) {
        histogram!("rollcall_sweep_duration_seconds").record(duration.as_secs_f64());
        counter!("rollcall_sweep_failures_total", "sweep" => "expiry").increment(report.failed);
    }

    /// Record one no-show pass.
    pub fn record_no_shows(report: &NoShowReport) {
        counter!("rollcall_no_shows_total").increment(report.marked);
        counter!("rollcall_sweep_failures_total", "sweep" => "no_show").increment(report.failed);
    }
}
