//! Enqueue reconciliation.
//!
//! The coordinator enqueues the invoice job only after its transaction
//! commits. If the process dies between commit and enqueue, or the enqueue
//! itself fails, the order has no job. The reconciler periodically finds
//! committed orders older than a grace period with no `invoice_jobs` row and
//! enqueues one for each. A duplicate job (the coordinator's enqueue landing
//! after the scan) only regenerates the same invoice.

use orderdesk_core::error::QueueError;
use orderdesk_core::queue::{InvoiceJob, JobQueue};
use orderdesk_core::types::OrderId;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Finds committed orders without an invoice job and enqueues one.
pub struct EnqueueReconciler {
    pool: PgPool,
    queue: Arc<dyn JobQueue>,
    grace_period: Duration,
    batch_size: i64,
}

impl EnqueueReconciler {
    /// Create a reconciler with a 60 s grace period and batches of 100.
    #[must_use]
    pub fn new(pool: PgPool, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            pool,
            queue,
            grace_period: Duration::from_secs(60),
            batch_size: 100,
        }
    }

    /// Only consider orders older than `grace_period`.
    #[must_use]
    pub const fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Maximum orders handled per pass.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// One reconciliation pass. Returns how many jobs were enqueued.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the scan or an enqueue fails. Jobs
    /// enqueued before the failure stay enqueued.
    pub async fn run_once(&self) -> Result<usize, QueueError> {
        let rows = sqlx::query(
            r"
            SELECT o.id, o.created_at, u.email
            FROM orders o
            JOIN users u ON u.id = o.user_id
            WHERE o.created_at < now() - make_interval(secs => $1)
              AND NOT EXISTS (SELECT 1 FROM invoice_jobs j WHERE j.order_id = o.id)
            ORDER BY o.id
            LIMIT $2
            ",
        )
        .bind(self.grace_period.as_secs_f64())
        .bind(self.batch_size)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| QueueError::Unavailable(format!("Failed to scan for orphaned orders: {e}")))?;

        let mut enqueued = 0;
        for row in rows {
            let order_id = OrderId::new(row.get("id"));
            let job = InvoiceJob {
                order_id,
                buyer_email: row.get("email"),
                timestamp: Some(row.get("created_at")),
            };

            let job_id = self.queue.enqueue(job).await?;
            tracing::warn!(order_id = %order_id, job_id = %job_id, "Reconciled missing invoice job");
            metrics::counter!("invoice_jobs_reconciled_total").increment(1);
            enqueued += 1;
        }

        Ok(enqueued)
    }

    /// Run passes every `interval` until `shutdown` fires.
    pub async fn run(self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            grace_secs = self.grace_period.as_secs(),
            "Enqueue reconciler started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count, "Reconciliation pass enqueued jobs"),
                        Err(e) => tracing::error!(error = %e, "Reconciliation pass failed"),
                    }
                }
            }
        }

        tracing::info!("Enqueue reconciler stopped");
    }
}
