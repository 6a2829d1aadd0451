//! Invoice worker pool.
//!
//! Runs `concurrency` independent consumer loops against a [`JobQueue`].
//! Each loop reserves one job, generates its invoice under a timeout equal to
//! the lease, then acknowledges it or reports the failure back to the queue.
//! The queue owns the retry schedule; the worker only classifies failures.
//!
//! Loops check for shutdown between jobs, never during one, so a job that
//! was reserved before shutdown is finished and acknowledged.

use crate::metrics::WorkerMetrics;
use crate::shutdown::ShutdownHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderdesk_core::error::{QueueError, WorkerError};
use orderdesk_core::generator::InvoiceGenerator;
use orderdesk_core::queue::{Delivery, JobId, JobQueue, NackOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Number of concurrent consumer loops.
    pub concurrency: usize,
    /// Idle sleep when the queue has nothing due.
    pub poll_interval: Duration,
    /// Lease requested per reservation; also bounds one generation.
    pub lease_duration: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerConfig {
    /// Two loops, 1 s polling, 30 s leases.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_secs(1),
            lease_duration: Duration::from_secs(30),
        }
    }

    /// Set the number of loops (at least one).
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = if concurrency == 0 { 1 } else { concurrency };
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the lease duration.
    #[must_use]
    pub const fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }
}

/// What happened to one reserved job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Invoice stored and job acknowledged.
    Completed(JobId),
    /// Attempt failed; the queue will redeliver at `run_at`.
    Retrying {
        /// The job.
        job_id: JobId,
        /// Next delivery time.
        run_at: DateTime<Utc>,
    },
    /// Attempt failed and the job is now dead.
    DeadLettered(JobId),
    /// The lease expired before the result was reported; another delivery
    /// owns the job now.
    LeaseLost(JobId),
}

/// Consumes invoice jobs.
pub struct InvoiceWorker {
    queue: Arc<dyn JobQueue>,
    generator: InvoiceGenerator,
    config: WorkerConfig,
}

impl InvoiceWorker {
    /// Create a worker.
    #[must_use]
    pub fn new(queue: Arc<dyn JobQueue>, generator: InvoiceGenerator, config: WorkerConfig) -> Self {
        Self {
            queue,
            generator,
            config,
        }
    }

    /// Reserve and process at most one job.
    ///
    /// Returns `None` when nothing is due.
    ///
    /// # Errors
    ///
    /// [`QueueError`] if the queue cannot be reached. Generation failures are
    /// not errors here; they are reported to the queue and returned as an
    /// outcome.
    pub async fn process_next(&self) -> Result<Option<JobOutcome>, QueueError> {
        let Some(delivery) = self.queue.reserve(self.config.lease_duration).await? else {
            return Ok(None);
        };
        self.handle(delivery).await.map(Some)
    }

    async fn handle(&self, delivery: Delivery) -> Result<JobOutcome, QueueError> {
        let start = Instant::now();
        let Delivery {
            job_id,
            lease,
            attempt,
            max_attempts,
            job,
        } = delivery;

        tracing::debug!(job_id = %job_id, order_id = %job.order_id, attempt, "Processing invoice job");

        let result = match tokio::time::timeout(self.config.lease_duration, self.generator.generate(&job)).await {
            Ok(result) => result.map(|_| ()),
            Err(_) => Err(WorkerError::Transient(format!(
                "invoice generation exceeded lease of {}s",
                self.config.lease_duration.as_secs()
            ))),
        };

        match result {
            Ok(()) => match self.queue.ack(job_id, lease).await {
                Ok(()) => {
                    WorkerMetrics::record_completed(start.elapsed());
                    Ok(JobOutcome::Completed(job_id))
                }
                Err(QueueError::LeaseLost(id)) => {
                    tracing::warn!(job_id = %id, "Lease lost before ack; job will be redelivered");
                    Ok(JobOutcome::LeaseLost(id))
                }
                Err(e) => Err(e),
            },
            Err(failure) => {
                let kind = failure.kind();
                WorkerMetrics::record_failed(kind);

                match self.queue.nack(job_id, lease, failure.to_string(), kind).await {
                    Ok(NackOutcome::Retrying { run_at }) => {
                        tracing::warn!(
                            job_id = %job_id,
                            order_id = %job.order_id,
                            attempt,
                            max_attempts,
                            retry_at = %run_at,
                            error = %failure,
                            "Invoice job failed, will retry"
                        );
                        Ok(JobOutcome::Retrying { job_id, run_at })
                    }
                    Ok(NackOutcome::DeadLettered) => {
                        WorkerMetrics::record_dead_lettered();
                        tracing::error!(
                            job_id = %job_id,
                            order_id = %job.order_id,
                            attempt,
                            kind = kind.as_str(),
                            error = %failure,
                            "Invoice job dead-lettered"
                        );
                        Ok(JobOutcome::DeadLettered(job_id))
                    }
                    Err(QueueError::LeaseLost(id)) => {
                        tracing::warn!(job_id = %id, error = %failure, "Lease lost before nack");
                        Ok(JobOutcome::LeaseLost(id))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Start the consumer loops. They stop taking new jobs once `shutdown`
    /// fires.
    #[must_use]
    pub fn spawn(self, shutdown: &broadcast::Receiver<()>) -> WorkerHandle {
        let concurrency = self.config.concurrency.max(1);
        let worker = Arc::new(self);

        tracing::info!(
            concurrency,
            poll_ms = u64::try_from(worker.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            lease_secs = worker.config.lease_duration.as_secs(),
            "Invoice worker started"
        );

        let tasks = (0..concurrency)
            .map(|index| {
                let worker = Arc::clone(&worker);
                let shutdown = shutdown.resubscribe();
                tokio::spawn(async move { worker.run_loop(index, shutdown).await })
            })
            .collect();

        WorkerHandle {
            tasks: Mutex::new(tasks),
        }
    }

    async fn run_loop(&self, index: usize, mut shutdown: broadcast::Receiver<()>) {
        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                Ok(()) | Err(TryRecvError::Closed | TryRecvError::Lagged(_)) => break,
            }

            match self.process_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => tracing::error!(worker = index, error = %e, "Failed to poll invoice queue"),
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                () = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }

        tracing::info!(worker = index, "Invoice worker loop stopped");
    }
}

/// Running worker loops.
pub struct WorkerHandle {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Wait for every loop to exit.
    pub async fn join(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Invoice worker loop panicked");
            }
        }
    }
}

#[async_trait]
impl ShutdownHandler for WorkerHandle {
    fn name(&self) -> &str {
        "invoice-worker"
    }

    async fn shutdown(&self) -> Result<(), String> {
        self.join().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = WorkerConfig::new()
            .with_concurrency(0)
            .with_poll_interval(Duration::from_millis(10))
            .with_lease_duration(Duration::from_secs(5));

        assert_eq!(config.concurrency, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.lease_duration, Duration::from_secs(5));
        assert_eq!(WorkerConfig::default(), WorkerConfig::new());
    }
}
