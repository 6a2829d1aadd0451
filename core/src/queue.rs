//! Durable job queue contract for invoice generation.
//!
//! ```text
//!  Coordinator ──enqueue──▶ ┌──────────┐ ──reserve──▶ InvoiceWorker
//!   (after commit)          │ pending  │              │
//!                           └──────────┘              ├─ ack  ──▶ completed
//!                              ▲     │ lease expires  ├─ nack(Transient)
//!                              │     ▼                │     attempts < max ──▶ pending (run_at += backoff)
//!                              │  running ────────────┤     attempts = max ──▶ dead
//!                              │                      └─ nack(Permanent) ───▶ dead
//!                              └──── requeue (operator) ◀──────────────────── dead
//! ```
//!
//! Delivery is at-least-once. A reserved job is invisible to other consumers
//! until its lease expires; each delivery carries a [`LeaseToken`] and
//! acknowledgements carrying a stale token are rejected with
//! [`QueueError::LeaseLost`].

use crate::error::QueueError;
use crate::types::OrderId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

/// Boxed future returned by queue operations.
pub type QueueFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Unique identifier for a queued job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    /// Creates a new `JobId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token identifying one delivery of a job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    /// A fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload of an invoice job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceJob {
    /// Committed order to invoice
    pub order_id: OrderId,
    /// Buyer email captured at placement
    pub buyer_email: String,
    /// Commit timestamp; the invoice's `generated_at` when present
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// A reserved job handed to one consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    /// Job id
    pub job_id: JobId,
    /// Token for this delivery
    pub lease: LeaseToken,
    /// 1 for the first delivery, incremented on every reservation
    pub attempt: u32,
    /// Attempt ceiling the job was enqueued with
    pub max_attempts: u32,
    /// Payload
    pub job: InvoiceJob,
}

/// How a failed delivery should be treated.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Retry with backoff until the attempt ceiling.
    Transient,
    /// Dead-letter immediately.
    Permanent,
}

impl FailureKind {
    /// Metric / log label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        }
    }
}

/// What happened to a job after `nack`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NackOutcome {
    /// Scheduled again.
    Retrying {
        /// When the job becomes due
        run_at: DateTime<Utc>,
    },
    /// Moved to the dead-letter state.
    DeadLettered,
}

/// Lifecycle state of a job row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for `run_at`
    Pending,
    /// Leased to a consumer
    Running,
    /// Acknowledged
    Completed,
    /// Exhausted or permanently failed
    Dead,
}

impl JobStatus {
    /// Database string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Dead => "dead",
        }
    }

    /// Parse a database string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "dead" => Some(Self::Dead),
            _ => None,
        }
    }
}

/// A dead-lettered job, for operator inspection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Job id
    pub job_id: JobId,
    /// Payload
    pub job: InvoiceJob,
    /// Deliveries made before giving up
    pub attempts: u32,
    /// Error from the last failed delivery
    pub last_error: Option<String>,
    /// When the job was dead-lettered
    pub failed_at: DateTime<Utc>,
}

/// Durable, at-least-once work queue.
///
/// # Dyn Compatibility
///
/// Returns `Pin<Box<dyn Future>>` so the queue can be shared as
/// `Arc<dyn JobQueue>` by the coordinator and the worker pool.
pub trait JobQueue: Send + Sync {
    /// Persist a new pending job.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] if the job could not be persisted.
    fn enqueue(&self, job: InvoiceJob) -> QueueFuture<'_, JobId>;

    /// Claim the oldest due job for `lease`. `None` when nothing is due.
    ///
    /// Jobs whose previous lease expired are due again; if such a job has
    /// already used its last attempt it is dead-lettered instead.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] on backend failure.
    fn reserve(&self, lease: Duration) -> QueueFuture<'_, Option<Delivery>>;

    /// Mark a delivery completed.
    ///
    /// # Errors
    ///
    /// [`QueueError::LeaseLost`] if the lease no longer belongs to `lease`.
    fn ack(&self, job_id: JobId, lease: LeaseToken) -> QueueFuture<'_, ()>;

    /// Report a failed delivery.
    ///
    /// # Errors
    ///
    /// [`QueueError::LeaseLost`] if the lease no longer belongs to `lease`.
    fn nack(
        &self,
        job_id: JobId,
        lease: LeaseToken,
        error: String,
        kind: FailureKind,
    ) -> QueueFuture<'_, NackOutcome>;

    /// Most recent dead-lettered jobs, newest first.
    ///
    /// # Errors
    ///
    /// [`QueueError::Unavailable`] on backend failure.
    fn dead_letters(&self, limit: usize) -> QueueFuture<'_, Vec<DeadLetter>>;

    /// Move a dead job back to pending with its attempts reset.
    ///
    /// # Errors
    ///
    /// [`QueueError::JobNotFound`] if no dead job has this id.
    fn requeue(&self, job_id: JobId) -> QueueFuture<'_, ()>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn job_payload_uses_camel_case_keys() {
        let job = InvoiceJob {
            order_id: OrderId::new(12),
            buyer_email: "b@example.com".to_string(),
            timestamp: None,
        };
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["orderId"], 12);
        assert_eq!(json["buyerEmail"], "b@example.com");

        let back: InvoiceJob =
            serde_json::from_str(r#"{"orderId":12,"buyerEmail":"b@example.com"}"#).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn job_status_parse() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Dead,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("exploded"), None);
    }
}
