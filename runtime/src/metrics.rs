//! Prometheus metrics for the order and invoice pipeline.
//!
//! The coordinator, generator and queue adapters record through the
//! [`metrics`] facade. This module installs the Prometheus recorder, registers
//! descriptions, and renders the exposition text served at `GET /metrics`.
//!
//! # Example
//!
//! ```rust,no_run
//! use orderdesk_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.start()?;
//!
//! let body = exporter.render().unwrap_or_default();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use orderdesk_core::queue::FailureKind;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, histogram};

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

/// Installed Prometheus recorder.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter. Nothing is recorded until [`start`](Self::start).
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Register descriptions and install the global recorder.
    ///
    /// Installing twice in one process (tests) is tolerated; the second
    /// exporter has no handle and renders nothing.
    ///
    /// # Errors
    ///
    /// [`MetricsError`] if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Prometheus recorder installed");
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

    /// The Prometheus handle, if this exporter installed the recorder.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    // Orders
    describe_counter!("orders_placed_total", "Orders committed by the coordinator");
    describe_counter!(
        "orders_rejected_total",
        "Orders rejected, labelled by reason"
    );
    describe_counter!(
        "order_enqueue_failures_total",
        "Committed orders whose invoice job could not be enqueued"
    );
    describe_histogram!(
        "order_placement_duration_seconds",
        "Time spent in the reserve-and-record transaction"
    );

    // Invoice jobs
    describe_counter!(
        "invoice_jobs_completed_total",
        "Invoice jobs acknowledged after a successful generation"
    );
    describe_counter!(
        "invoice_jobs_failed_total",
        "Invoice job attempts that failed, labelled by kind"
    );
    describe_counter!(
        "invoice_jobs_dead_lettered_total",
        "Invoice jobs moved to the dead state"
    );
    describe_counter!(
        "invoice_jobs_requeued_total",
        "Dead invoice jobs requeued by an operator"
    );
    describe_counter!(
        "invoice_jobs_reconciled_total",
        "Invoice jobs enqueued by the reconciler for orphaned orders"
    );
    describe_histogram!(
        "invoice_generation_duration_seconds",
        "Time taken to read an order and persist its invoice"
    );
    describe_histogram!(
        "invoice_job_duration_seconds",
        "Time from reservation to acknowledgement of an invoice job"
    );
}

/// Recorders for the invoice worker.
pub struct WorkerMetrics;

impl WorkerMetrics {
    /// A job was generated and acknowledged.
    pub fn record_completed(duration: Duration) {
        counter!("invoice_jobs_completed_total").increment(1);
        histogram!("invoice_job_duration_seconds").record(duration.as_secs_f64());
    }

    /// An attempt failed.
    pub fn record_failed(kind: FailureKind) {
        counter!("invoice_jobs_failed_total", "kind" => kind.as_str()).increment(1);
    }

    /// A failed attempt exhausted the job.
    pub fn record_dead_lettered() {
        counter!("invoice_jobs_dead_lettered_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_exporter_creation() {
        let exporter = MetricsExporter::new();
        assert!(exporter.handle().is_none());
        assert!(exporter.render().is_none());
    }

    #[test]
    fn test_exporter_start_is_repeatable() {
        let mut first = MetricsExporter::new();
        assert!(first.start().is_ok());

        // A second install in the same process is tolerated.
        let mut second = MetricsExporter::new();
        assert!(second.start().is_ok());
    }

    #[test]
    fn test_recorders_do_not_panic_without_exporter() {
        WorkerMetrics::record_completed(Duration::from_millis(5));
        WorkerMetrics::record_failed(FailureKind::Transient);
        WorkerMetrics::record_dead_lettered();
    }
}
