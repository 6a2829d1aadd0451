//! Dead-lettered invoice jobs.
//!
//! Jobs land in the `dead` state after a permanent failure, after their last
//! transient failure, or when the lease of their final attempt expires. They
//! stay there until an operator requeues them.

use crate::job_queue::{PgJobQueue, unavailable};
use chrono::{DateTime, Utc};
use orderdesk_core::error::QueueError;
use orderdesk_core::queue::{DeadLetter, InvoiceJob, JobId};
use sqlx::Row;

impl PgJobQueue {
    /// Most recently dead-lettered jobs, newest first.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the query fails, or
    /// [`QueueError::Serialization`] if a payload cannot be decoded.
    pub async fn list_dead(&self, limit: usize) -> Result<Vec<DeadLetter>, QueueError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT id, payload, attempts, last_error, COALESCE(failed_at, updated_at) AS failed_at
            FROM invoice_jobs
            WHERE status = 'dead'
            ORDER BY failed_at DESC NULLS LAST, id DESC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| unavailable("Failed to list dead letters", &e))?;

        rows.iter().map(Self::row_to_dead_letter).collect()
    }

    /// Move a dead job back to `pending` with its attempt counter reset.
    ///
    /// # Errors
    ///
    /// [`QueueError::JobNotFound`] if no dead job has this id.
    pub async fn requeue_dead(&self, job_id: JobId) -> Result<(), QueueError> {
        let result = sqlx::query(
            r"
            UPDATE invoice_jobs
            SET status = 'pending',
                attempts = 0,
                run_at = now(),
                failed_at = NULL,
                updated_at = now()
            WHERE id = $1 AND status = 'dead'
            ",
        )
        .bind(job_id.get())
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("Failed to requeue job", &e))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::JobNotFound(job_id));
        }

        tracing::info!(job_id = %job_id, "Dead-lettered invoice job requeued");
        metrics::counter!("invoice_jobs_requeued_total").increment(1);

        Ok(())
    }

    /// Number of dead jobs. Useful for monitoring and health checks.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the query fails.
    pub async fn count_dead(&self) -> Result<i64, QueueError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM invoice_jobs WHERE status = 'dead'")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| unavailable("Failed to count dead letters", &e))?;

        Ok(count)
    }

    fn row_to_dead_letter(row: &sqlx::postgres::PgRow) -> Result<DeadLetter, QueueError> {
        let job_id = JobId::new(row.get("id"));
        let payload: serde_json::Value = row.get("payload");
        let job: InvoiceJob = serde_json::from_value(payload)
            .map_err(|e| QueueError::Serialization(format!("job {job_id}: {e}")))?;
        let attempts: i32 = row.get("attempts");
        let failed_at: DateTime<Utc> = row.get("failed_at");

        Ok(DeadLetter {
            job_id,
            job,
            attempts: u32::try_from(attempts).unwrap_or(0),
            last_error: row.get("last_error"),
            failed_at,
        })
    }
}
