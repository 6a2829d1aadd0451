//! # Orderdesk Runtime
//!
//! Long-running pieces that sit around the order core: the invoice worker
//! pool, the file-backed invoice store, backoff helpers, the Prometheus
//! exporter and shutdown coordination.
//!
//! ## Example
//!
//! ```ignore
//! use orderdesk_runtime::worker::{InvoiceWorker, WorkerConfig};
//! use orderdesk_runtime::shutdown::ShutdownCoordinator;
//!
//! let mut shutdown = ShutdownCoordinator::new(Duration::from_secs(30));
//! let handle = InvoiceWorker::new(queue, generator, WorkerConfig::new())
//!     .spawn(&shutdown.subscribe());
//! shutdown.register(Arc::new(handle));
//!
//! // ... later
//! shutdown.shutdown().await?;
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics exporter and recorders
pub mod metrics;

/// Graceful shutdown coordination
pub mod shutdown;

/// Invoice documents as JSON files
pub mod file_store;

/// Invoice worker pool
pub mod worker;

pub use file_store::FileInvoiceStore;
pub use shutdown::{ShutdownCoordinator, ShutdownHandler};
pub use worker::{InvoiceWorker, JobOutcome, WorkerConfig, WorkerHandle};
