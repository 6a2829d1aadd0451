//! `PostgreSQL` adapters for orderdesk.
//!
//! This crate implements the storage contracts from `orderdesk-core` on top
//! of sqlx:
//!
//! - [`PgOrderStore`]: products and orders, `SELECT ... FOR UPDATE` row locks
//!   with bounded `lock_timeout` / `statement_timeout`
//! - [`PgJobQueue`]: durable invoice job queue (`FOR UPDATE SKIP LOCKED`
//!   leases, retries, dead letters)
//! - [`PgInvoiceStore`]: invoice documents upserted by order id
//! - [`EnqueueReconciler`]: re-enqueues invoice jobs for committed orders
//!   that never got one
//!
//! # Example
//!
//! ```ignore
//! use orderdesk_postgres::{migrate, PgJobQueue, PgOrderStore};
//! use sqlx::postgres::PgPoolOptions;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = PgPoolOptions::new().connect("postgres://localhost/orderdesk").await?;
//!     migrate(&pool).await?;
//!
//!     let store = PgOrderStore::new(pool.clone());
//!     let queue = PgJobQueue::new(pool, RetryPolicy::default());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod dead_letters;
mod invoice_store;
mod job_queue;
mod order_store;
mod reconciler;

pub use invoice_store::PgInvoiceStore;
pub use job_queue::PgJobQueue;
pub use order_store::PgOrderStore;
pub use reconciler::EnqueueReconciler;

use orderdesk_core::error::StoreError;
use sqlx::PgPool;

/// SQLSTATEs that mean "this transaction lost a race; nothing was written".
///
/// - `55P03` `lock_not_available` (`lock_timeout`)
/// - `40P01` `deadlock_detected`
/// - `40001` `serialization_failure`
/// - `57014` `query_canceled` (`statement_timeout`)
/// - `23514` `check_violation` (stock would go negative)
const ABORT_CODES: [&str; 5] = ["55P03", "40P01", "40001", "57014", "23514"];

/// `foreign_key_violation`
const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Run the bundled migrations.
///
/// # Errors
///
/// Returns the migrator error if any migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Classify a sqlx error as an aborted transaction or an unavailable store.
pub(crate) fn classify(context: &str, err: &sqlx::Error) -> StoreError {
    match sqlstate(err) {
        Some(code) if ABORT_CODES.contains(&code.as_str()) => {
            StoreError::Aborted(format!("{context}: {err} (SQLSTATE {code})"))
        }
        _ => StoreError::Unavailable(format!("{context}: {err}")),
    }
}

/// SQLSTATE of a database error, if any.
pub(crate) fn sqlstate(err: &sqlx::Error) -> Option<String> {
    err.as_database_error()
        .and_then(|db| db.code().map(|c| c.into_owned()))
}

/// Whether `err` is a foreign-key violation.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).as_deref() == Some(FOREIGN_KEY_VIOLATION)
}

/// Convert a non-negative database integer into `u32`.
pub(crate) fn to_u32(column: &str, value: i32) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Unavailable(format!("{column} is negative: {value}")))
}
