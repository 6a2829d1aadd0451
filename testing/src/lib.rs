//! # Orderdesk Testing
//!
//! In-memory adapters and helpers for fast, deterministic tests.
//!
//! This crate provides:
//! - [`InMemoryOrderStore`]: products, users and orders with per-product row locks
//! - [`InMemoryJobQueue`]: leases, retries and dead letters with the same
//!   semantics as the Postgres queue
//! - [`InMemoryInvoiceStore`]: overwrite-by-id invoice storage
//! - [`FixedClock`] / [`ManualClock`]: deterministic time
//! - [`fixtures`]: callers and cart lines
//!
//! ## Example
//!
//! ```ignore
//! use orderdesk_testing::{fixtures, InMemoryJobQueue, InMemoryOrderStore, test_clock};
//!
//! #[tokio::test]
//! async fn places_an_order() {
//!     let store = Arc::new(InMemoryOrderStore::new(Arc::new(test_clock())));
//!     store.add_user(UserId::new(1), "Ada", "ada@example.com");
//!     store.add_product(ProductId::new(1), "Widget", dec!(10.00), 5);
//!
//!     let coordinator = OrderCoordinator::new(store.clone(), queue, clock);
//!     let placement = coordinator
//!         .place_order(&fixtures::customer(1), vec![fixtures::line(1, 2)])
//!         .await
//!         .unwrap();
//!
//!     assert_eq!(store.stock_of(ProductId::new(1)), Some(3));
//! }
//! ```

use chrono::{DateTime, Utc};
use orderdesk_core::environment::Clock;

pub mod fixtures;
pub mod invoice_store;
pub mod job_queue;
pub mod order_store;

pub use invoice_store::InMemoryInvoiceStore;
pub use job_queue::InMemoryJobQueue;
pub use order_store::InMemoryOrderStore;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use orderdesk_testing::mocks::FixedClock;
    /// use orderdesk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used to drive lease expiry and retry backoff in queue tests.
    ///
    /// ```
    /// use orderdesk_testing::mocks::ManualClock;
    /// use orderdesk_testing::test_clock_time;
    /// use orderdesk_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = ManualClock::new(test_clock_time());
    /// let before = clock.now();
    /// clock.advance(Duration::from_secs(30));
    /// assert_eq!((clock.now() - before).num_seconds(), 30);
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock stopped at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            if let Ok(delta) = chrono::Duration::from_std(by) {
                *time += delta;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_clock_time())
    }

    /// 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock_time() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::seconds(1_735_689_600)
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, ManualClock, test_clock, test_clock_time};

/// Install a test-writer tracing subscriber once per process.
///
/// Honors `RUST_LOG`; silent by default.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("off")),
        )
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        let time1 = clock.now();
        let time2 = clock.now();
        assert_eq!(time1, time2);
        assert_eq!(time1.year(), 2025);
        assert_eq!(time1.ordinal(), 1);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(test_clock_time());
        clock.advance(std::time::Duration::from_secs(90));
        assert_eq!((clock.now() - test_clock_time()).num_seconds(), 90);
    }
}
