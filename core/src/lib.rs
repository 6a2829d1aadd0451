//! # Orderdesk Core
//!
//! Order placement with race-safe inventory reservation, and the contracts
//! for the asynchronous invoice pipeline that consumes committed orders.
//!
//! ## Components
//!
//! ```text
//!   ┌──────────────────┐  begin/lock/insert/commit  ┌──────────────────┐
//!   │ OrderCoordinator │ ─────────────────────────▶ │    OrderStore    │
//!   └──────────────────┘                            │ (inventory +     │
//!            │ enqueue (after commit)               │  orders)         │
//!            ▼                                      └──────────────────┘
//!   ┌──────────────────┐  reserve/ack/nack                   ▲ find_detail
//!   │     JobQueue     │ ◀─────────────┐                     │
//!   └──────────────────┘               │            ┌──────────────────┐
//!                                      └─────────── │ InvoiceGenerator │ ──▶ InvoiceStore
//!                                      (runtime)    └──────────────────┘
//! ```
//!
//! - [`coordinator::OrderCoordinator`]: the reserve-and-record transaction
//! - [`queries::OrderQueries`]: listings and lookup with the access rule
//! - [`queue::JobQueue`]: durable at-least-once queue contract
//! - [`generator::InvoiceGenerator`]: one invoice job, idempotent
//!
//! Adapters live in sibling crates: `orderdesk-postgres` (sqlx),
//! `orderdesk-testing` (in-memory), `orderdesk-runtime` (worker pool, file
//! invoice store).
//!
//! ## Example
//!
//! ```ignore
//! use orderdesk_core::coordinator::OrderCoordinator;
//! use orderdesk_core::types::{CartLine, Caller, ProductId, Role, UserId};
//!
//! let coordinator = OrderCoordinator::new(store, queue, clock);
//! let caller = Caller::new(UserId::new(1), "ada@example.com", Role::Customer);
//!
//! let placement = coordinator
//!     .place_order(&caller, vec![CartLine::new(ProductId::new(3), 2)])
//!     .await?;
//!
//! println!("order {} total {}", placement.order.id, placement.order.total_amount);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use rust_decimal::Decimal;

pub mod cart;
pub mod coordinator;
pub mod error;
pub mod generator;
pub mod invoice;
pub mod queries;
pub mod queue;
pub mod retry;
pub mod store;
pub mod types;

/// Environment module - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production
    /// let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    ///
    /// // Tests
    /// let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(test_clock_time()));
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
