//! Route table.

use crate::handlers::{admin, health, orders};
use crate::middleware::correlation_id_layer;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// Build the application router.
///
/// ```text
/// POST /orders                    place an order
/// GET  /orders                    all orders (admin)
/// GET  /orders/mine               caller's orders
/// GET  /orders/:id                one order with items
/// GET  /orders/:id/invoice        invoice document
/// GET  /admin/jobs/dead           dead-lettered jobs (admin)
/// POST /admin/jobs/:id/requeue    requeue a dead job (admin)
/// GET  /health, /health/ready, /metrics
/// ```
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(orders::create_order).get(orders::list_orders))
        .route("/orders/mine", get(orders::list_my_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/invoice", get(orders::get_invoice))
        .route("/admin/jobs/dead", get(admin::list_dead_jobs))
        .route("/admin/jobs/:id/requeue", post(admin::requeue_job))
        .route("/health", get(health::health_check))
        .route("/health/ready", get(health::readiness))
        .route("/metrics", get(health::metrics))
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
