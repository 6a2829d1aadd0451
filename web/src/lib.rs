//! Axum HTTP boundary for orderdesk.
//!
//! Handlers translate requests into calls on the order core and map the
//! domain error taxonomy onto HTTP statuses. Caller identity arrives from
//! the upstream auth gateway as trusted headers.
//!
//! # Request Flow
//!
//! 1. **Correlation id** assigned by middleware
//! 2. **Caller** extracted from `X-User-*` headers (401 if absent)
//! 3. **Body** validated into cart lines (422 if malformed)
//! 4. **Core** call: coordinator, queries or queue
//! 5. **Error mapping** through [`AppError`]
//!
//! # Example
//!
//! ```ignore
//! use orderdesk_web::{AppState, router};
//!
//! let state = AppState::new(store, queue, invoices, coordinator);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use error::AppError;
pub use extractors::{AppJson, AppPath, AppQuery, CorrelationId, CurrentCaller};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};
pub use router::router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
