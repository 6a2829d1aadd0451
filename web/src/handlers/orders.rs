//! Order endpoints.
//!
//! - `POST /orders`: place an order
//! - `GET /orders`: every order (admin)
//! - `GET /orders/mine`: the caller's orders
//! - `GET /orders/:id`: one order with items
//! - `GET /orders/:id/invoice`: the generated invoice document

use crate::error::AppError;
use crate::extractors::{AppJson, AppPath, CorrelationId, CurrentCaller};
use crate::state::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use orderdesk_core::coordinator::InvoiceJobStatus;
use orderdesk_core::invoice::Invoice;
use orderdesk_core::queue::JobId;
use orderdesk_core::types::{CartLine, Order, OrderDetail, OrderId, ProductId};
use serde::{Deserialize, Serialize};

/// One requested line.
#[derive(Debug, Deserialize)]
pub struct OrderItemRequest {
    /// Product to buy.
    pub product_id: i64,
    /// Units to buy.
    #[serde(alias = "quantity")]
    pub qty: i64,
}

/// Body of `POST /orders`.
#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    /// Requested lines; at least one.
    pub items: Vec<OrderItemRequest>,
}

impl CreateOrderRequest {
    /// Check shape and convert to cart lines.
    ///
    /// # Errors
    ///
    /// [`AppError::validation`] if there are no items or an id or quantity
    /// is not a positive integer.
    pub fn into_lines(self) -> Result<Vec<CartLine>, AppError> {
        if self.items.is_empty() {
            return Err(AppError::validation("At least one item is required"));
        }

        self.items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                if item.product_id <= 0 {
                    return Err(AppError::validation(format!(
                        "items[{i}].product_id must be a positive integer"
                    )));
                }
                let qty = u32::try_from(item.qty).ok().filter(|q| *q > 0).ok_or_else(|| {
                    AppError::validation(format!("items[{i}].qty must be a positive integer"))
                })?;
                Ok(CartLine::new(ProductId::new(item.product_id), qty))
            })
            .collect()
    }
}

/// What happened to the invoice job, as reported to the client.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvoiceJobView {
    /// The job is durable.
    Queued {
        /// Queue id of the job.
        job_id: JobId,
    },
    /// The order is committed but the job is not guaranteed.
    EnqueueFailed {
        /// Machine-readable code.
        code: &'static str,
        /// Human-readable explanation.
        message: String,
    },
}

impl From<InvoiceJobStatus> for InvoiceJobView {
    fn from(status: InvoiceJobStatus) -> Self {
        match status {
            InvoiceJobStatus::Queued(job_id) => Self::Queued { job_id },
            InvoiceJobStatus::EnqueueFailed(_) => Self::EnqueueFailed {
                code: "QUEUE_ENQUEUE_FAILED",
                message: "Order created but the invoice job could not be queued; it will be reconciled"
                    .to_string(),
            },
        }
    }
}

/// Body of a successful `POST /orders`.
#[derive(Debug, Serialize)]
pub struct CreateOrderResponse {
    /// Summary message.
    pub message: &'static str,
    /// Committed order header.
    pub order: Order,
    /// Invoice job status.
    pub invoice_job: InvoiceJobView,
}

/// List of order headers.
#[derive(Debug, Serialize)]
pub struct OrdersResponse {
    /// Headers, newest first.
    pub orders: Vec<Order>,
}

/// A single order with items.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    /// The order.
    pub order: OrderDetail,
}

/// `POST /orders`
///
/// # Errors
///
/// 401 without identity, 400 on unparsable JSON, 422 on malformed items,
/// 403 for an unregistered buyer, 404 for an unknown product, 409 for
/// insufficient stock, 503 when the transaction aborts.
pub async fn create_order(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    CorrelationId(correlation_id): CorrelationId,
    AppJson(request): AppJson<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), AppError> {
    let lines = request.into_lines()?;
    let placement = state.coordinator.place_order(&caller, lines).await?;

    let message = if placement.invoice_job.is_queued() {
        "Order created and job queued"
    } else {
        tracing::warn!(
            correlation_id = %correlation_id,
            order_id = %placement.order.id,
            "Order created without invoice job"
        );
        "Order created; invoice job not queued"
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            message,
            order: placement.order,
            invoice_job: placement.invoice_job.into(),
        }),
    ))
}

/// `GET /orders`
///
/// # Errors
///
/// 403 for non-admin callers.
pub async fn list_orders(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
) -> Result<Json<OrdersResponse>, AppError> {
    let orders = state.queries.list_all(&caller).await?;
    Ok(Json(OrdersResponse { orders }))
}

/// `GET /orders/mine`
///
/// # Errors
///
/// 500 if the store is unavailable.
pub async fn list_my_orders(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
) -> Result<Json<OrdersResponse>, AppError> {
    let orders = state.queries.list_for_buyer(&caller).await?;
    Ok(Json(OrdersResponse { orders }))
}

/// `GET /orders/:id`
///
/// # Errors
///
/// 404 if the order does not exist or belongs to someone else.
pub async fn get_order(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    AppPath(id): AppPath<i64>,
) -> Result<Json<OrderResponse>, AppError> {
    let order = state.queries.get_by_id(&caller, OrderId::new(id)).await?;
    Ok(Json(OrderResponse { order }))
}

/// `GET /orders/:id/invoice`
///
/// # Errors
///
/// 404 if the order is not readable by the caller or no invoice has been
/// generated yet.
pub async fn get_invoice(
    State(state): State<AppState>,
    CurrentCaller(caller): CurrentCaller,
    AppPath(id): AppPath<i64>,
) -> Result<Json<Invoice>, AppError> {
    let order_id = OrderId::new(id);
    // Access rule first so a foreign invoice looks like a missing order.
    state.queries.get_by_id(&caller, order_id).await?;

    state
        .invoices
        .load(order_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Invoice for order {order_id} not generated yet")))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use orderdesk_core::error::QueueError;

    fn request(items: serde_json::Value) -> CreateOrderRequest {
        serde_json::from_value(serde_json::json!({ "items": items })).unwrap()
    }

    #[test]
    fn test_request_converts_to_lines() {
        let lines = request(serde_json::json!([
            {"product_id": 1, "qty": 2},
            {"product_id": 3, "quantity": 1}
        ]))
        .into_lines()
        .unwrap();

        assert_eq!(
            lines,
            vec![
                CartLine::new(ProductId::new(1), 2),
                CartLine::new(ProductId::new(3), 1)
            ]
        );
    }

    #[test]
    fn test_request_rejects_bad_lines() {
        for items in [
            serde_json::json!([]),
            serde_json::json!([{"product_id": 0, "qty": 1}]),
            serde_json::json!([{"product_id": 1, "qty": 0}]),
            serde_json::json!([{"product_id": 1, "qty": -4}]),
        ] {
            let err = request(items).into_lines().unwrap_err();
            assert_eq!(err.code(), "VALIDATION_ERROR");
        }
    }

    #[test]
    fn test_job_view_shapes() {
        let queued = serde_json::to_value(InvoiceJobView::from(InvoiceJobStatus::Queued(JobId::new(5)))).unwrap();
        assert_eq!(queued, serde_json::json!({"status": "queued", "job_id": 5}));

        let failed = serde_json::to_value(InvoiceJobView::from(InvoiceJobStatus::EnqueueFailed(
            QueueError::Unavailable("redis down".into()),
        )))
        .unwrap();
        assert_eq!(failed["status"], "enqueue_failed");
        assert_eq!(failed["code"], "QUEUE_ENQUEUE_FAILED");
    }
}
