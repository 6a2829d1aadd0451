//! Custom Axum extractors.
//!
//! - `CorrelationId`: the request correlation id
//! - `CurrentCaller`: the authenticated caller, as asserted by the upstream
//!   auth gateway through trusted headers
//! - `AppJson`, `AppPath`, `AppQuery`: body, path and query extractors
//!   whose rejections use the [`AppError`] body

use crate::error::AppError;
use axum::{
    Json, async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use orderdesk_core::types::{Caller, Role, UserId};
use uuid::Uuid;

/// Header carrying the caller's numeric id.
pub const USER_ID_HEADER: &str = "X-User-Id";
/// Header carrying the caller's email.
pub const USER_EMAIL_HEADER: &str = "X-User-Email";
/// Header carrying the caller's role (`admin` is privileged).
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// Correlation ID for request tracing.
///
/// Taken from the correlation middleware if installed, else from the
/// `X-Correlation-ID` header, else freshly generated.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        let correlation_id = parts
            .headers
            .get(crate::middleware::CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        Ok(Self(correlation_id))
    }
}

/// The authenticated caller.
///
/// Rejects with 401 when the identity headers are missing or malformed.
#[derive(Debug, Clone)]
pub struct CurrentCaller(pub Caller);

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER)
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::unauthorized("Missing or invalid caller identity"))?;

        let email = header(parts, USER_EMAIL_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing caller email"))?;

        let role = header(parts, USER_ROLE_HEADER).map_or(Role::Customer, Role::parse);

        Ok(Self(Caller::new(UserId::new(id), email, role)))
    }
}

/// JSON request body.
///
/// Same as [`Json`], but a missing content type, a syntax error or a shape
/// mismatch is answered with the usual `{code, message}` error body.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for AppJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Path parameters; a malformed segment is a 400 `{code, message}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for AppPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Query string; a malformed parameter is a 400 `{code, message}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for AppQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::bad_request(rejection.body_text()))?;
        Ok(Self(value))
    }
}
