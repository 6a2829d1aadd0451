//! Error types for web handlers.
//!
//! Bridges the domain error taxonomy to HTTP responses. Client errors map to
//! 4xx with the domain message; infrastructure errors map to 5xx and are
//! logged.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use orderdesk_core::error::{InvoiceStoreError, OrderError, QueueError};
use serde::Serialize;
use std::fmt;

/// Application error returned by every handler.
///
/// Serialized as `{"code": ..., "message": ...}` plus `details` when the
/// error carries structured data.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    code: String,
    details: Option<serde_json::Value>,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error with an explicit status and machine-readable code.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            details: None,
            source: None,
        }
    }

    /// Attach the underlying cause (logged, never sent to the client).
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Attach structured details to the response body.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 400.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into(), "BAD_REQUEST".to_string())
    }

    /// 401.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message.into(), "UNAUTHORIZED".to_string())
    }

    /// 403.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message.into(), "FORBIDDEN".to_string())
    }

    /// 404 with a free-form message.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message.into(), "NOT_FOUND".to_string())
    }

    /// 409.
    #[must_use]
    pub fn conflict(message: impl Into<String>, code: &str) -> Self {
        Self::new(StatusCode::CONFLICT, message.into(), code.to_string())
    }

    /// 422.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            message.into(),
            "VALIDATION_ERROR".to_string(),
        )
    }

    /// 500.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// 503.
    #[must_use]
    pub fn unavailable(message: impl Into<String>, code: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, message.into(), code.to_string())
    }

    /// HTTP status of this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "Request failed"
                );
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
            details: self.details,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let message = rejection.body_text();
        match rejection {
            JsonRejection::JsonDataError(_) => Self::validation(message),
            JsonRejection::MissingJsonContentType(_) => Self::new(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                message,
                "UNSUPPORTED_MEDIA_TYPE".to_string(),
            ),
            _ => Self::bad_request(message),
        }
    }
}

impl From<OrderError> for AppError {
    fn from(err: OrderError) -> Self {
        match &err {
            OrderError::Validation(msg) => Self::validation(msg.clone()),
            OrderError::ProductNotFound(_) | OrderError::OrderNotFound(_) => {
                Self::not_found(err.to_string())
            }
            OrderError::Forbidden(msg) => Self::forbidden(msg.clone()),
            OrderError::UnknownBuyer(_) => Self::new(
                StatusCode::FORBIDDEN,
                err.to_string(),
                "UNKNOWN_BUYER".to_string(),
            ),
            OrderError::InsufficientStock {
                product_id,
                available,
                requested,
            } => Self::conflict(err.to_string(), "INSUFFICIENT_STOCK").with_details(
                serde_json::json!({
                    "product_id": product_id,
                    "available": available,
                    "requested": requested,
                }),
            ),
            OrderError::TransactionAborted(_) => {
                Self::unavailable("The order could not be completed, please retry", "TRANSACTION_ABORTED")
                    .with_source(err.into())
            }
            OrderError::StoreUnavailable(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            }
        }
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match &err {
            QueueError::JobNotFound(id) => Self::not_found(format!("Dead job {id} not found")),
            QueueError::LeaseLost(_) => Self::conflict(err.to_string(), "LEASE_LOST"),
            QueueError::Unavailable(_) | QueueError::Serialization(_) => {
                Self::internal("An internal error occurred").with_source(err.into())
            }
        }
    }
}

impl From<InvoiceStoreError> for AppError {
    fn from(err: InvoiceStoreError) -> Self {
        Self::internal("An internal error occurred").with_source(err.into())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderdesk_core::types::{OrderId, ProductId, UserId};

    #[test]
    fn test_error_display() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn test_order_error_mapping() {
        let cases = [
            (OrderError::Validation("empty".into()), StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            (OrderError::ProductNotFound(ProductId::new(9)), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (OrderError::OrderNotFound(OrderId::new(9)), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (OrderError::Forbidden("admin only".into()), StatusCode::FORBIDDEN, "FORBIDDEN"),
            (OrderError::UnknownBuyer(UserId::new(9)), StatusCode::FORBIDDEN, "UNKNOWN_BUYER"),
            (OrderError::TransactionAborted("deadlock".into()), StatusCode::SERVICE_UNAVAILABLE, "TRANSACTION_ABORTED"),
            (OrderError::StoreUnavailable("down".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR"),
        ];

        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn test_insufficient_stock_carries_details() {
        let app: AppError = OrderError::InsufficientStock {
            product_id: ProductId::new(4),
            available: 2,
            requested: 3,
        }
        .into();

        assert_eq!(app.status(), StatusCode::CONFLICT);
        assert_eq!(app.code(), "INSUFFICIENT_STOCK");
        assert_eq!(
            app.details,
            Some(serde_json::json!({"product_id": 4, "available": 2, "requested": 3}))
        );
    }

    #[test]
    fn test_infrastructure_detail_is_not_leaked() {
        let app: AppError = OrderError::StoreUnavailable("password=hunter2".into()).into();
        assert!(!app.to_string().contains("hunter2"));
        assert!(std::error::Error::source(&app).is_some());
    }
}
