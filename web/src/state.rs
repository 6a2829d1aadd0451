//! Application state shared by every handler.

use orderdesk_core::coordinator::OrderCoordinator;
use orderdesk_core::invoice::InvoiceStore;
use orderdesk_core::queries::OrderQueries;
use orderdesk_core::queue::JobQueue;
use orderdesk_core::store::OrderStore;
use orderdesk_runtime::metrics::MetricsExporter;
use std::sync::Arc;

/// Handles injected at startup. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Places orders.
    pub coordinator: OrderCoordinator,
    /// Reads orders under the access rule.
    pub queries: OrderQueries,
    /// Invoice documents, for `GET /orders/{id}/invoice`.
    pub invoices: Arc<dyn InvoiceStore>,
    /// Job queue, for dead-letter administration.
    pub queue: Arc<dyn JobQueue>,
    /// Store handle, for readiness checks.
    pub store: Arc<dyn OrderStore>,
    /// Prometheus exporter, if metrics are enabled.
    pub metrics: Option<Arc<MetricsExporter>>,
}

impl AppState {
    /// Wire the state from a store, queue and invoice store.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        queue: Arc<dyn JobQueue>,
        invoices: Arc<dyn InvoiceStore>,
        coordinator: OrderCoordinator,
    ) -> Self {
        Self {
            queries: OrderQueries::new(Arc::clone(&store)),
            coordinator,
            invoices,
            queue,
            store,
            metrics: None,
        }
    }

    /// Serve `GET /metrics` from `exporter`.
    #[must_use]
    pub fn with_metrics(mut self, exporter: Arc<MetricsExporter>) -> Self {
        self.metrics = Some(exporter);
        self
    }
}
