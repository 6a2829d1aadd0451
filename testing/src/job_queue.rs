//! In-memory job queue with lease, retry and dead-letter semantics.

#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use orderdesk_core::environment::{Clock, SystemClock};
use orderdesk_core::error::QueueError;
use orderdesk_core::queue::{
    DeadLetter, Delivery, FailureKind, InvoiceJob, JobId, JobQueue, JobStatus, LeaseToken,
    NackOutcome, QueueFuture,
};
use orderdesk_core::retry::RetryPolicy;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone)]
struct JobRow {
    job: InvoiceJob,
    status: JobStatus,
    attempts: u32,
    max_attempts: u32,
    run_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
    lease: Option<LeaseToken>,
    last_error: Option<String>,
    failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct QueueState {
    jobs: BTreeMap<JobId, JobRow>,
    next_id: i64,
}

/// In-memory [`JobQueue`].
///
/// Same state machine as the Postgres queue: pending → running (leased) →
/// completed | pending (retry) | dead. Expired leases are redelivered on the
/// next `reserve`, or dead-lettered if no attempts remain.
#[derive(Clone)]
pub struct InMemoryJobQueue {
    state: Arc<Mutex<QueueState>>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    fail_enqueue: Arc<AtomicBool>,
}

fn plus(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(at)
}

impl InMemoryJobQueue {
    /// Create an empty queue using the system clock.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(QueueState::default())),
            policy,
            clock: Arc::new(SystemClock),
            fail_enqueue: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `clock` for due times and lease expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every `enqueue` fail with [`QueueError::Unavailable`] while set.
    pub fn set_fail_enqueue(&self, fail: bool) {
        self.fail_enqueue.store(fail, Ordering::SeqCst);
    }

    /// Current status of a job.
    #[must_use]
    pub fn status_of(&self, id: JobId) -> Option<JobStatus> {
        self.state().jobs.get(&id).map(|row| row.status)
    }

    /// Deliveries made so far for a job.
    #[must_use]
    pub fn attempts_of(&self, id: JobId) -> Option<u32> {
        self.state().jobs.get(&id).map(|row| row.attempts)
    }

    /// Every job payload ever enqueued, in id order.
    #[must_use]
    pub fn jobs(&self) -> Vec<InvoiceJob> {
        self.state().jobs.values().map(|row| row.job.clone()).collect()
    }

    /// Number of jobs in `status`.
    #[must_use]
    pub fn count(&self, status: JobStatus) -> usize {
        self.state()
            .jobs
            .values()
            .filter(|row| row.status == status)
            .count()
    }

    /// Total jobs held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state().jobs.len()
    }

    /// Whether no job was ever enqueued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state().jobs.is_empty()
    }

    fn dead_letter_expired(state: &mut QueueState, now: DateTime<Utc>) {
        for (id, row) in &mut state.jobs {
            let expired = row.status == JobStatus::Running
                && row.locked_until.is_some_and(|until| until <= now);
            if expired && row.attempts >= row.max_attempts {
                tracing::warn!(job_id = %id, attempts = row.attempts, "Lease expired on final attempt");
                row.status = JobStatus::Dead;
                row.lease = None;
                row.locked_until = None;
                row.failed_at = Some(now);
                row.last_error = Some(format!("lease expired after {} attempts", row.attempts));
            }
        }
    }

    fn leased_row<'a>(
        state: &'a mut QueueState,
        id: JobId,
        lease: LeaseToken,
    ) -> Result<&'a mut JobRow, QueueError> {
        let row = state.jobs.get_mut(&id).ok_or(QueueError::JobNotFound(id))?;
        if row.status != JobStatus::Running || row.lease != Some(lease) {
            return Err(QueueError::LeaseLost(id));
        }
        Ok(row)
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: InvoiceJob) -> QueueFuture<'_, JobId> {
        Box::pin(async move {
            if self.fail_enqueue.load(Ordering::SeqCst) {
                return Err(QueueError::Unavailable("queue is down".to_string()));
            }
            let now = self.clock.now();
            let mut state = self.state();
            state.next_id += 1;
            let id = JobId::new(state.next_id);
            state.jobs.insert(
                id,
                JobRow {
                    job,
                    status: JobStatus::Pending,
                    attempts: 0,
                    max_attempts: self.policy.max_attempts(),
                    run_at: now,
                    locked_until: None,
                    lease: None,
                    last_error: None,
                    failed_at: None,
                },
            );
            Ok(id)
        })
    }

    fn reserve(&self, lease: Duration) -> QueueFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state();
            Self::dead_letter_expired(&mut state, now);

            let candidate = state
                .jobs
                .iter()
                .filter(|(_, row)| match row.status {
                    JobStatus::Pending => row.run_at <= now,
                    JobStatus::Running => row.locked_until.is_some_and(|until| until <= now),
                    JobStatus::Completed | JobStatus::Dead => false,
                })
                .min_by_key(|(id, row)| (row.run_at, **id))
                .map(|(id, _)| *id);

            let Some(id) = candidate else {
                return Ok(None);
            };
            let Some(row) = state.jobs.get_mut(&id) else {
                return Ok(None);
            };

            let token = LeaseToken::generate();
            row.status = JobStatus::Running;
            row.attempts += 1;
            row.lease = Some(token);
            row.locked_until = Some(plus(now, lease));

            Ok(Some(Delivery {
                job_id: id,
                lease: token,
                attempt: row.attempts,
                max_attempts: row.max_attempts,
                job: row.job.clone(),
            }))
        })
    }

    fn ack(&self, job_id: JobId, lease: LeaseToken) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state();
            let row = Self::leased_row(&mut state, job_id, lease)?;
            row.status = JobStatus::Completed;
            row.lease = None;
            row.locked_until = None;
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
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state();
            let row = Self::leased_row(&mut state, job_id, lease)?;

            row.lease = None;
            row.locked_until = None;
            row.last_error = Some(error);

            if kind == FailureKind::Transient && row.attempts < row.max_attempts {
                let run_at = plus(now, self.policy.backoff_after(row.attempts));
                row.status = JobStatus::Pending;
                row.run_at = run_at;
                Ok(NackOutcome::Retrying { run_at })
            } else {
                row.status = JobStatus::Dead;
                row.failed_at = Some(now);
                Ok(NackOutcome::DeadLettered)
            }
        })
    }

    fn dead_letters(&self, limit: usize) -> QueueFuture<'_, Vec<DeadLetter>> {
        Box::pin(async move {
            let state = self.state();
            let mut dead: Vec<DeadLetter> = state
                .jobs
                .iter()
                .filter(|(_, row)| row.status == JobStatus::Dead)
                .map(|(id, row)| DeadLetter {
                    job_id: *id,
                    job: row.job.clone(),
                    attempts: row.attempts,
                    last_error: row.last_error.clone(),
                    failed_at: row.failed_at.unwrap_or(row.run_at),
                })
                .collect();
            dead.sort_by(|a, b| b.failed_at.cmp(&a.failed_at).then(b.job_id.cmp(&a.job_id)));
            dead.truncate(limit);
            Ok(dead)
        })
    }

    fn requeue(&self, job_id: JobId) -> QueueFuture<'_, ()> {
        Box::pin(async move {
            let now = self.clock.now();
            let mut state = self.state();
            match state.jobs.get_mut(&job_id) {
                Some(row) if row.status == JobStatus::Dead => {
                    row.status = JobStatus::Pending;
                    row.attempts = 0;
                    row.run_at = now;
                    row.failed_at = None;
                    Ok(())
                }
                _ => Err(QueueError::JobNotFound(job_id)),
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::{ManualClock, test_clock_time};
    use orderdesk_core::types::OrderId;

    const LEASE: Duration = Duration::from_secs(30);

    fn queue(max_attempts: u32) -> (InMemoryJobQueue, ManualClock) {
        let clock = ManualClock::new(test_clock_time());
        let policy = RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_secs(1))
            .with_jitter(false);
        let queue = InMemoryJobQueue::new(policy).with_clock(Arc::new(clock.clone()));
        (queue, clock)
    }

    fn job(order: i64) -> InvoiceJob {
        InvoiceJob {
            order_id: OrderId::new(order),
            buyer_email: "ada@example.com".to_string(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn reserved_job_is_invisible_until_lease_expires() {
        let (queue, clock) = queue(3);
        let id = queue.enqueue(job(1)).await.unwrap();

        let first = queue.reserve(LEASE).await.unwrap().unwrap();
        assert_eq!(first.job_id, id);
        assert_eq!(first.attempt, 1);
        assert!(queue.reserve(LEASE).await.unwrap().is_none());

        clock.advance(LEASE);
        let second = queue.reserve(LEASE).await.unwrap().unwrap();
        assert_eq!(second.job_id, id);
        assert_eq!(second.attempt, 2);
        assert_ne!(first.lease, second.lease);

        let err = queue.ack(id, first.lease).await.unwrap_err();
        assert_eq!(err, QueueError::LeaseLost(id));
        queue.ack(id, second.lease).await.unwrap();
        assert_eq!(queue.status_of(id), Some(JobStatus::Completed));
    }

    #[tokio::test]
    async fn transient_failures_back_off_then_dead_letter() {
        let (queue, clock) = queue(2);
        let id = queue.enqueue(job(1)).await.unwrap();

        let d = queue.reserve(LEASE).await.unwrap().unwrap();
        let outcome = queue
            .nack(id, d.lease, "io".into(), FailureKind::Transient)
            .await
            .unwrap();
        assert!(matches!(outcome, NackOutcome::Retrying { .. }));
        assert!(queue.reserve(LEASE).await.unwrap().is_none());

        clock.advance(Duration::from_secs(1));
        let d = queue.reserve(LEASE).await.unwrap().unwrap();
        assert_eq!(d.attempt, 2);
        let outcome = queue
            .nack(id, d.lease, "io again".into(), FailureKind::Transient)
            .await
            .unwrap();
        assert_eq!(outcome, NackOutcome::DeadLettered);

        let dead = queue.dead_letters(10).await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("io again"));
    }

    #[tokio::test]
    async fn permanent_failure_dead_letters_immediately() {
        let (queue, _clock) = queue(5);
        let id = queue.enqueue(job(1)).await.unwrap();
        let d = queue.reserve(LEASE).await.unwrap().unwrap();

        let outcome = queue
            .nack(id, d.lease, "order 1 not found".into(), FailureKind::Permanent)
            .await
            .unwrap();
        assert_eq!(outcome, NackOutcome::DeadLettered);
        assert_eq!(queue.status_of(id), Some(JobStatus::Dead));
    }

    #[tokio::test]
    async fn expired_final_attempt_is_dead_lettered() {
        let (queue, clock) = queue(1);
        let id = queue.enqueue(job(1)).await.unwrap();
        let _d = queue.reserve(LEASE).await.unwrap().unwrap();

        clock.advance(LEASE);
        assert!(queue.reserve(LEASE).await.unwrap().is_none());
        assert_eq!(queue.status_of(id), Some(JobStatus::Dead));
    }

    #[tokio::test]
    async fn requeue_resets_attempts() {
        let (queue, _clock) = queue(1);
        let id = queue.enqueue(job(1)).await.unwrap();
        let d = queue.reserve(LEASE).await.unwrap().unwrap();
        queue
            .nack(id, d.lease, "boom".into(), FailureKind::Transient)
            .await
            .unwrap();

        queue.requeue(id).await.unwrap();
        assert_eq!(queue.status_of(id), Some(JobStatus::Pending));
        assert_eq!(queue.attempts_of(id), Some(0));

        let d = queue.reserve(LEASE).await.unwrap().unwrap();
        assert_eq!(d.attempt, 1);

        assert_eq!(
            queue.requeue(id).await.unwrap_err(),
            QueueError::JobNotFound(id)
        );
    }

    #[tokio::test]
    async fn jobs_are_delivered_oldest_first() {
        let (queue, clock) = queue(3);
        let a = queue.enqueue(job(1)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        let b = queue.enqueue(job(2)).await.unwrap();

        assert_eq!(queue.reserve(LEASE).await.unwrap().unwrap().job_id, a);
        assert_eq!(queue.reserve(LEASE).await.unwrap().unwrap().job_id, b);
    }
}
