//! Error taxonomy for order placement, the job queue and invoice generation.
//!
//! Business-rule failures ([`OrderError::ProductNotFound`],
//! [`OrderError::InsufficientStock`], ...) are client errors and never leave
//! partial state behind. Infrastructure failures are either retryable
//! ([`OrderError::TransactionAborted`]) or not ([`OrderError::StoreUnavailable`]).

use crate::queue::{FailureKind, JobId};
use crate::types::{OrderId, ProductId, UserId};
use thiserror::Error;

/// Errors raised by a store adapter.
///
/// Adapters classify their native failures into these buckets; the
/// coordinator lifts them into [`OrderError`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The transaction was rolled back by the store (lock timeout, deadlock,
    /// serialization failure, statement timeout, failed commit).
    #[error("Transaction aborted: {0}")]
    Aborted(String),

    /// The store could not be reached or returned an unexpected error.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The order's buyer has no user record (foreign-key violation).
    #[error("Buyer {0} does not exist")]
    UnknownBuyer(UserId),
}

/// Errors from order placement and order queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    /// Caller input is malformed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A referenced product does not exist.
    #[error("Product {0} not found")]
    ProductNotFound(ProductId),

    /// The order does not exist or is hidden from the caller.
    #[error("Order not found")]
    OrderNotFound(OrderId),

    /// The caller lacks the privilege for a listing operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The authenticated caller has no user record to own an order.
    #[error("User {0} is not registered")]
    UnknownBuyer(UserId),

    /// Requested quantity exceeds the stock observed under the row lock.
    #[error(
        "Insufficient stock for product {product_id}. Available: {available}, Requested: {requested}"
    )]
    InsufficientStock {
        /// Product that ran short
        product_id: ProductId,
        /// Stock seen under the lock
        available: u32,
        /// Quantity the cart asked for
        requested: u32,
    },

    /// The transaction did not commit. Nothing was written; safe to retry.
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    /// The store is unreachable or misbehaving.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl OrderError {
    /// Whether re-running the whole operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionAborted(_) | Self::StoreUnavailable(_))
    }

    /// Whether the failure is the caller's (4xx) rather than ours (5xx).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        !self.is_retryable()
    }

    /// Short label used for the `reason` metric dimension.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::ProductNotFound(_) => "product_not_found",
            Self::OrderNotFound(_) => "order_not_found",
            Self::Forbidden(_) => "forbidden",
            Self::UnknownBuyer(_) => "unknown_buyer",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::TransactionAborted(_) => "transaction_aborted",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<StoreError> for OrderError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Aborted(msg) => Self::TransactionAborted(msg),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            StoreError::UnknownBuyer(id) => Self::UnknownBuyer(id),
        }
    }
}

/// Errors from the durable job queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue backend could not be reached.
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    /// The delivery's lease expired and the job was handed to someone else.
    #[error("Lease lost for job {0}")]
    LeaseLost(JobId),

    /// No job with this id exists (or it is not in the expected state).
    #[error("Job {0} not found")]
    JobNotFound(JobId),

    /// The job payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure raised while processing one invoice job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// Retrying cannot help (the order is gone). Dead-lettered immediately.
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Anything else. Retried by the queue's policy.
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl WorkerError {
    /// How the queue should treat this failure.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Permanent(_) => FailureKind::Permanent,
            Self::Transient(_) => FailureKind::Transient,
        }
    }
}

/// Errors from invoice document storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvoiceStoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Database failure.
    #[error("Database error: {0}")]
    DatabaseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_names_quantities() {
        let err = OrderError::InsufficientStock {
            product_id: ProductId::new(4),
            available: 2,
            requested: 3,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for product 4. Available: 2, Requested: 3"
        );
        assert!(err.is_client_error());
    }

    #[test]
    fn store_errors_lift_into_infrastructure_variants() {
        let aborted: OrderError = StoreError::Aborted("deadlock".into()).into();
        let down: OrderError = StoreError::Unavailable("refused".into()).into();

        assert!(matches!(aborted, OrderError::TransactionAborted(_)));
        assert!(matches!(down, OrderError::StoreUnavailable(_)));
        assert!(aborted.is_retryable());
        assert!(down.is_retryable());
    }

    #[test]
    fn unknown_buyer_is_a_client_error() {
        let err: OrderError = StoreError::UnknownBuyer(UserId::new(42)).into();

        assert_eq!(err, OrderError::UnknownBuyer(UserId::new(42)));
        assert!(err.is_client_error());
        assert_eq!(err.reason(), "unknown_buyer");
    }

    #[test]
    fn worker_error_kind() {
        assert_eq!(
            WorkerError::Permanent("gone".into()).kind(),
            FailureKind::Permanent
        );
        assert_eq!(
            WorkerError::Transient("io".into()).kind(),
            FailureKind::Transient
        );
    }
}
