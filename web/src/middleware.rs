//! Correlation-id middleware.
//!
//! 1. Read `X-Correlation-ID` from the request, or generate a v4 UUID
//! 2. Store it in request extensions (see [`CorrelationId`](crate::extractors::CorrelationId))
//! 3. Run the request inside an `http_request` span carrying the id
//! 4. Echo the id on the response and log the outcome
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/orders", post(create_order))
//!     .layer(correlation_id_layer());
//! ```

use axum::{extract::Request, http::HeaderValue, response::Response};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

/// Header used to propagate the correlation id.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Create the correlation-id layer.
#[must_use]
pub const fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// Layer wrapping services in [`CorrelationIdMiddleware`].
#[derive(Clone, Copy, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Service assigning a correlation id to every request.
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = req
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        req.extensions_mut().insert(correlation_id);

        let span = tracing::info_span!(
            "http_request",
            correlation_id = %correlation_id,
            method = %req.method(),
            path = %req.uri().path(),
        );

        let start = Instant::now();
        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let mut response = fut.await?;

                tracing::debug!(
                    status = response.status().as_u16(),
                    latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "Request completed"
                );

                if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
                    response.headers_mut().insert(CORRELATION_ID_HEADER, value);
                }

                Ok(response)
            }
            .instrument(span),
        )
    }
}
