//! Invoice generation for one job.

use crate::environment::Clock;
use crate::error::WorkerError;
use crate::invoice::{Invoice, InvoiceStore};
use crate::queue::InvoiceJob;
use crate::store::OrderStore;
use metrics::histogram;
use std::sync::Arc;
use std::time::Instant;

/// Re-reads a committed order, projects it and persists the invoice.
///
/// Safe to run any number of times for the same order: the projection is
/// deterministic apart from `generated_at` and the store overwrites by id.
#[derive(Clone)]
pub struct InvoiceGenerator {
    orders: Arc<dyn OrderStore>,
    invoices: Arc<dyn InvoiceStore>,
    clock: Arc<dyn Clock>,
}

impl InvoiceGenerator {
    /// Creates a generator.
    #[must_use]
    pub fn new(
        orders: Arc<dyn OrderStore>,
        invoices: Arc<dyn InvoiceStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            invoices,
            clock,
        }
    }

    /// Generate and persist the invoice for `job`.
    ///
    /// # Errors
    ///
    /// - [`WorkerError::Permanent`] if the order no longer exists
    /// - [`WorkerError::Transient`] on store or invoice storage failure
    pub async fn generate(&self, job: &InvoiceJob) -> Result<Invoice, WorkerError> {
        let start = Instant::now();

        let detail = self
            .orders
            .find_detail(job.order_id)
            .await
            .map_err(|e| WorkerError::Transient(format!("failed to load order {}: {e}", job.order_id)))?
            .ok_or_else(|| {
                WorkerError::Permanent(format!("order {} not found", job.order_id))
            })?;

        let generated_at = job.timestamp.unwrap_or_else(|| self.clock.now());
        let invoice = Invoice::project(&detail, generated_at);

        self.invoices.save(&invoice).await.map_err(|e| {
            WorkerError::Transient(format!(
                "failed to store invoice {}: {e}",
                invoice.invoice_id
            ))
        })?;

        histogram!("invoice_generation_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %job.order_id,
            invoice_id = %invoice.invoice_id,
            items = invoice.items.len(),
            "Invoice generated"
        );

        Ok(invoice)
    }
}
