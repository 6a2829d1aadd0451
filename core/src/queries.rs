//! Read-side order operations with the access rule applied.

use crate::error::OrderError;
use crate::store::OrderStore;
use crate::types::{Caller, Order, OrderDetail, OrderId};
use std::sync::Arc;

/// Order listings and lookup by id.
///
/// A non-privileged caller only ever sees their own orders. Asking for
/// somebody else's order by id yields the same [`OrderError::OrderNotFound`]
/// as asking for an id that does not exist.
#[derive(Clone)]
pub struct OrderQueries {
    store: Arc<dyn OrderStore>,
}

impl OrderQueries {
    /// Creates the query service.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Every order, newest first. Privileged callers only.
    ///
    /// # Errors
    ///
    /// [`OrderError::Forbidden`] for non-privileged callers, or a store error.
    pub async fn list_all(&self, caller: &Caller) -> Result<Vec<Order>, OrderError> {
        if !caller.role.is_privileged() {
            tracing::warn!(user_id = %caller.id, "Non-admin attempted to list all orders");
            return Err(OrderError::Forbidden(
                "listing all orders requires the admin role".to_string(),
            ));
        }
        Ok(self.store.list_all().await?)
    }

    /// The caller's own orders, newest first.
    ///
    /// # Errors
    ///
    /// Store errors only.
    pub async fn list_for_buyer(&self, caller: &Caller) -> Result<Vec<Order>, OrderError> {
        Ok(self.store.list_for_buyer(caller.id).await?)
    }

    /// One order with buyer and items.
    ///
    /// # Errors
    ///
    /// [`OrderError::OrderNotFound`] if the order does not exist or belongs
    /// to another buyer and the caller is not privileged.
    pub async fn get_by_id(&self, caller: &Caller, id: OrderId) -> Result<OrderDetail, OrderError> {
        match self.store.find_detail(id).await? {
            Some(detail) if caller.can_read_orders_of(detail.order.buyer_id) => Ok(detail),
            Some(_) => {
                tracing::debug!(order_id = %id, user_id = %caller.id, "Order hidden from caller");
                Err(OrderError::OrderNotFound(id))
            }
            None => Err(OrderError::OrderNotFound(id)),
        }
    }
}
