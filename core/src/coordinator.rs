//! Order transaction coordinator.
//!
//! Executes the reserve-and-record protocol for one cart:
//!
//! ```text
//! begin ─▶ lock products (ascending id) ─▶ check stock under lock
//!       ─▶ insert order ─▶ insert lines (captured prices) ─▶ deduct stock
//!       ─▶ commit ─▶ enqueue invoice job ─▶ OrderPlacement
//! ```
//!
//! Any failure before commit rolls the transaction back, so no order, line
//! or stock change is ever visible for a failed placement and no job is
//! enqueued. A failed enqueue after commit does not undo the order; it is
//! reported on the returned [`OrderPlacement`] instead.
//!
//! The protocol runs on its own tokio task. Dropping the future returned by
//! [`OrderCoordinator::place_order`] (a disconnected client) does not
//! cancel it: the transaction still commits or rolls back and the job is
//! still enqueued.

use crate::cart::Cart;
use crate::environment::Clock;
use crate::error::{OrderError, QueueError};
use crate::queue::{InvoiceJob, JobId, JobQueue};
use crate::store::{OrderStore, OrderTransaction};
use crate::types::{CartLine, Caller, LockedProduct, NewOrder, Order, OrderLine, ProductId};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of handing the invoice job to the queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvoiceJobStatus {
    /// Job persisted.
    Queued(JobId),
    /// The order is committed but no job was persisted. Needs reconciliation.
    EnqueueFailed(QueueError),
}

impl InvoiceJobStatus {
    /// Whether the job made it into the queue.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        matches!(self, Self::Queued(_))
    }
}

/// Result of a successful placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderPlacement {
    /// Committed order header
    pub order: Order,
    /// Committed lines, in first-appearance order
    pub lines: Vec<OrderLine>,
    /// What happened to the invoice job
    pub invoice_job: InvoiceJobStatus,
}

/// Places orders against an [`OrderStore`] and hands invoice work to a
/// [`JobQueue`].
#[derive(Clone)]
pub struct OrderCoordinator {
    store: Arc<dyn OrderStore>,
    queue: Arc<dyn JobQueue>,
    clock: Arc<dyn Clock>,
}

impl OrderCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, queue: Arc<dyn JobQueue>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            queue,
            clock,
        }
    }

    /// Atomically reserve stock and record an order for `caller`.
    ///
    /// # Errors
    ///
    /// - [`OrderError::Validation`]: empty cart or non-positive ids/quantities
    /// - [`OrderError::ProductNotFound`]: a line references a missing product
    /// - [`OrderError::InsufficientStock`]: a line asks for more than is left
    /// - [`OrderError::TransactionAborted`]: lock timeout, deadlock or failed commit
    /// - [`OrderError::StoreUnavailable`]: the store could not be reached
    ///
    /// In every error case nothing was written and no job was enqueued.
    pub async fn place_order(
        &self,
        caller: &Caller,
        lines: Vec<CartLine>,
    ) -> Result<OrderPlacement, OrderError> {
        let cart = Cart::new(lines).inspect_err(|e| {
            counter!("orders_rejected_total", "reason" => e.reason()).increment(1);
        })?;

        let this = self.clone();
        let caller = caller.clone();
        let task = tokio::spawn(async move { this.run(caller, cart).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "Order placement task failed");
                Err(OrderError::TransactionAborted(format!(
                    "order placement task failed: {e}"
                )))
            }
        }
    }

    async fn run(&self, caller: Caller, cart: Cart) -> Result<OrderPlacement, OrderError> {
        let start = Instant::now();

        let (order, lines) = match self.reserve_and_record(&caller, &cart).await {
            Ok(committed) => committed,
            Err(e) => {
                counter!("orders_rejected_total", "reason" => e.reason()).increment(1);
                if e.is_client_error() {
                    tracing::warn!(buyer_id = %caller.id, error = %e, "Order rejected");
                } else {
                    tracing::error!(buyer_id = %caller.id, error = %e, "Order transaction failed");
                }
                return Err(e);
            }
        };

        histogram!("order_placement_duration_seconds").record(start.elapsed().as_secs_f64());
        counter!("orders_placed_total").increment(1);
        tracing::info!(
            order_id = %order.id,
            buyer_id = %caller.id,
            total_amount = %order.total_amount,
            lines = lines.len(),
            "Order committed"
        );

        let job = InvoiceJob {
            order_id: order.id,
            buyer_email: caller.email.clone(),
            timestamp: Some(self.clock.now()),
        };

        let invoice_job = match self.queue.enqueue(job).await {
            Ok(job_id) => {
                tracing::debug!(order_id = %order.id, job_id = %job_id, "Invoice job queued");
                InvoiceJobStatus::Queued(job_id)
            }
            Err(e) => {
                counter!("order_enqueue_failures_total").increment(1);
                tracing::error!(
                    order_id = %order.id,
                    error = %e,
                    "Order committed but invoice job could not be enqueued"
                );
                InvoiceJobStatus::EnqueueFailed(e)
            }
        };

        Ok(OrderPlacement {
            order,
            lines,
            invoice_job,
        })
    }

    /// One transaction: lock, validate, write, commit. Rolls back on any
    /// failure before commit.
    async fn reserve_and_record(
        &self,
        caller: &Caller,
        cart: &Cart,
    ) -> Result<(Order, Vec<OrderLine>), OrderError> {
        let mut tx = self.store.begin().await?;

        match record(tx.as_mut(), caller, cart).await {
            Ok(committed) => {
                tx.commit().await?;
                Ok(committed)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback failed; connection discarded");
                }
                Err(e)
            }
        }
    }
}

async fn record(
    tx: &mut dyn OrderTransaction,
    caller: &Caller,
    cart: &Cart,
) -> Result<(Order, Vec<OrderLine>), OrderError> {
    let mut locked: HashMap<ProductId, LockedProduct> = HashMap::with_capacity(cart.len());

    for line in cart.lock_order() {
        let product = tx
            .lock_product(line.product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(line.product_id))?;

        if line.quantity > product.stock {
            return Err(OrderError::InsufficientStock {
                product_id: line.product_id,
                available: product.stock,
                requested: line.quantity,
            });
        }

        locked.insert(line.product_id, product);
    }

    let priced: Vec<(CartLine, Decimal)> = cart
        .lines()
        .iter()
        .map(|line| {
            locked
                .get(&line.product_id)
                .map(|product| (*line, product.price))
                .ok_or(OrderError::ProductNotFound(line.product_id))
        })
        .collect::<Result<_, _>>()?;

    let total_amount: Decimal = priced
        .iter()
        .map(|(line, price)| *price * Decimal::from(line.quantity))
        .sum();

    let order = tx
        .insert_order(NewOrder {
            buyer_id: caller.id,
            total_amount,
        })
        .await?;

    let mut lines = Vec::with_capacity(priced.len());
    for (line, unit_price) in priced {
        let order_line = OrderLine {
            order_id: order.id,
            product_id: line.product_id,
            quantity: line.quantity,
            unit_price,
        };
        tx.insert_line(order_line.clone()).await?;
        lines.push(order_line);
    }

    for line in cart.lock_order() {
        tx.deduct_stock(line.product_id, line.quantity).await?;
    }

    Ok((order, lines))
}
