//! Durable invoice job queue on `PostgreSQL`.
//!
//! One row per job in `invoice_jobs`. Consumers claim rows with
//! `FOR UPDATE SKIP LOCKED`, so concurrent workers never block on (or
//! double-claim) the same job. A claimed row carries a `lease_token` and a
//! `locked_until` deadline; once the deadline passes the row is claimable
//! again, which gives redelivery for workers that crashed mid-job.

use chrono::{DateTime, Utc};
use orderdesk_core::error::QueueError;
use orderdesk_core::queue::{
    DeadLetter, Delivery, FailureKind, InvoiceJob, JobId, JobQueue, LeaseToken, NackOutcome,
    QueueFuture,
};
use orderdesk_core::retry::RetryPolicy;
use sqlx::{PgPool, Row};
use std::time::Duration;

/// `PostgreSQL`-backed [`JobQueue`].
///
/// # Example
///
/// ```no_run
/// use orderdesk_postgres::PgJobQueue;
/// use orderdesk_core::queue::JobQueue;
/// use orderdesk_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let queue = PgJobQueue::new(pool, RetryPolicy::default());
///
/// if let Some(delivery) = queue.reserve(Duration::from_secs(30)).await? {
///     // ... generate the invoice ...
///     queue.ack(delivery.job_id, delivery.lease).await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PgJobQueue {
    pub(crate) pool: PgPool,
    policy: RetryPolicy,
}

pub(crate) fn unavailable(context: &str, err: &sqlx::Error) -> QueueError {
    QueueError::Unavailable(format!("{context}: {err}"))
}

impl PgJobQueue {
    /// Create a queue; new jobs get `policy.max_attempts()` attempts.
    #[must_use]
    pub const fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    /// Dead-letter running jobs whose lease expired on their final attempt.
    ///
    /// Returns how many rows were moved.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] on database failure.
    pub async fn reap_expired(&self) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r"
            UPDATE invoice_jobs
            SET status = 'dead',
                lease_token = NULL,
                locked_until = NULL,
                failed_at = now(),
                updated_at = now(),
                last_error = format('lease expired after %s attempts', attempts)
            WHERE status = 'running'
              AND locked_until <= now()
              AND attempts >= max_attempts
            ",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| unavailable("Failed to reap expired leases", &e))?;

        let reaped = result.rows_affected();
        if reaped > 0 {
            tracing::warn!(count = reaped, "Invoice jobs dead-lettered after lease expiry");
            metrics::counter!("invoice_jobs_dead_lettered_total").increment(reaped);
        }
        Ok(reaped)
    }

    /// Distinguish a stale lease from a missing job after a guarded update
    /// touched no rows.
    async fn lease_failure(&self, job_id: JobId) -> QueueError {
        match sqlx::query("SELECT 1 FROM invoice_jobs WHERE id = $1")
            .bind(job_id.get())
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(_)) => QueueError::LeaseLost(job_id),
            Ok(None) => QueueError::JobNotFound(job_id),
            Err(e) => unavailable("Failed to inspect job", &e),
        }
    }

    async fn reserve_next(&self, lease: Duration) -> Result<Option<Delivery>, QueueError> {
        self.reap_expired().await?;

        let token = LeaseToken::generate();
        let row = sqlx::query(
            r"
            WITH next AS (
                SELECT id
                FROM invoice_jobs
                WHERE (status = 'pending' AND run_at <= now())
                   OR (status = 'running' AND locked_until <= now() AND attempts < max_attempts)
                ORDER BY run_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE invoice_jobs j
            SET status = 'running',
                attempts = j.attempts + 1,
                lease_token = $1,
                locked_until = now() + make_interval(secs => $2),
                updated_at = now()
            FROM next
            WHERE j.id = next.id
            RETURNING j.id, j.attempts, j.max_attempts, j.payload
            ",
        )
        .bind(token.as_uuid())
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| unavailable("Failed to reserve job", &e))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let job_id = JobId::new(row.get("id"));
        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");
        let payload: serde_json::Value = row.get("payload");
        let job: InvoiceJob = serde_json::from_value(payload)
            .map_err(|e| QueueError::Serialization(format!("job {job_id}: {e}")))?;

        Ok(Some(Delivery {
            job_id,
            lease: token,
            attempt: u32::try_from(attempts).unwrap_or(0),
            max_attempts: u32::try_from(max_attempts).unwrap_or(0),
            job,
        }))
    }

    async fn fail(
        &self,
        job_id: JobId,
        lease: LeaseToken,
        error: String,
        kind: FailureKind,
    ) -> Result<NackOutcome, QueueError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| unavailable("Failed to start transaction", &e))?;

        let row = sqlx::query(
            r"
            SELECT attempts, max_attempts
            FROM invoice_jobs
            WHERE id = $1 AND lease_token = $2 AND status = 'running'
            FOR UPDATE
            ",
        )
        .bind(job_id.get())
        .bind(lease.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| unavailable("Failed to load job", &e))?;

        let Some(row) = row else {
            drop(tx);
            return Err(self.lease_failure(job_id).await);
        };

        let attempts: i32 = row.get("attempts");
        let max_attempts: i32 = row.get("max_attempts");

        let outcome = if kind == FailureKind::Transient && attempts < max_attempts {
            let delay = self
                .policy
                .backoff_after(u32::try_from(attempts).unwrap_or(0));
            let run_at: DateTime<Utc> = sqlx::query_scalar(
                r"
                UPDATE invoice_jobs
                SET status = 'pending',
                    lease_token = NULL,
                    locked_until = NULL,
                    last_error = $2,
                    run_at = now() + make_interval(secs => $3),
                    updated_at = now()
                WHERE id = $1
                RETURNING run_at
                ",
            )
            .bind(job_id.get())
            .bind(&error)
            .bind(delay.as_secs_f64())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| unavailable("Failed to reschedule job", &e))?;

            NackOutcome::Retrying { run_at }
        } else {
            sqlx::query(
                r"
                UPDATE invoice_jobs
                SET status = 'dead',
                    lease_token = NULL,
                    locked_until = NULL,
                    last_error = $2,
                    failed_at = now(),
                    updated_at = now()
                WHERE id = $1
                ",
            )
            .bind(job_id.get())
            .bind(&error)
            .execute(&mut *tx)
            .await
            .map_err(|e| unavailable("Failed to dead-letter job", &e))?;

            NackOutcome::DeadLettered
        };

        tx.commit()
            .await
            .map_err(|e| unavailable("Failed to commit job failure", &e))?;

        Ok(outcome)
    }
}

impl JobQueue for PgJobQueue {
    fn enqueue(&self, job: InvoiceJob) -> QueueFuture<'_, JobId> {
        Box::pin(async move {
            let payload = serde_json::to_value(&job)
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            let max_attempts = i32::try_from(self.policy.max_attempts()).unwrap_or(i32::MAX);

            let id: i64 = sqlx::query_scalar(
                r"
                INSERT INTO invoice_jobs (order_id, payload, max_attempts)
                VALUES ($1, $2, $3)
                RETURNING id
                ",
            )
            .bind(job.order_id.get())
            .bind(payload)
            .bind(max_attempts)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| unavailable("Failed to enqueue job", &e))?;

            Ok(JobId::new(id))
        })
    }

    fn reserve(&self, lease: Duration) -> QueueFuture<'_, Option<Delivery>> {
        Box::pin(self.reserve_next(lease))
    }

    fn ack(&self, job_id: JobId, lease: LeaseToken) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                r"
                UPDATE invoice_jobs
                SET status = 'completed',
                    lease_token = NULL,
                    locked_until = NULL,
                    updated_at = now()
                WHERE id = $1 AND lease_token = $2 AND status = 'running'
                ",
            )
            .bind(job_id.get())
            .bind(lease.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| unavailable("Failed to ack job", &e))?;

            if result.rows_affected() == 0 {
                return Err(self.lease_failure(job_id).await);
            }
            Ok(())
        })
    }

    fn nack(
        &self,
        job_id: JobId,
        lease: LeaseToken,
        error: String,
        kind: FailureKind,
    ) -> QueueFuture<'_, NackOutcome> {
        Box::pin(self.fail(job_id, lease, error, kind))
    }

    fn dead_letters(&self, limit: usize) -> QueueFuture<'_, Vec<DeadLetter>> {
        Box::pin(self.list_dead(limit))
    }

    fn requeue(&self, job_id: JobId) -> QueueFuture<'_, ()> {
        Box::pin(self.requeue_dead(job_id))
    }
}
