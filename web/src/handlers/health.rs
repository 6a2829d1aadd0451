//! Operational endpoints: liveness, readiness and Prometheus metrics.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

/// Readiness report.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ReadinessReport {
    /// `ready` or `unavailable`.
    pub status: &'static str,
    /// Store error, when not ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `GET /health`: the process is up.
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// `GET /health/ready`: the store answers.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessReport>) {
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessReport {
                status: "ready",
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessReport {
                    status: "unavailable",
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// `GET /metrics`: Prometheus exposition text.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.metrics.as_ref().and_then(|m| m.render()) {
        Some(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
