//! `PostgreSQL` inventory and order store.

use crate::{classify, is_foreign_key_violation, to_u32};
use orderdesk_core::error::StoreError;
use orderdesk_core::store::{OrderStore, OrderTransaction, StoreFuture};
use orderdesk_core::types::{
    BuyerSnapshot, LockedProduct, NewOrder, Order, OrderDetail, OrderId, OrderItemView, OrderLine,
    ProductId, UserId,
};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;

/// Products and orders on `PostgreSQL`.
///
/// Every transaction opened by [`OrderStore::begin`] sets
/// `lock_timeout` and `statement_timeout` locally, so a placement waiting on
/// a hot product row gives up with `55P03` instead of queueing forever.
///
/// # Example
///
/// ```no_run
/// use orderdesk_postgres::PgOrderStore;
/// use std::time::Duration;
///
/// # async fn example(pool: sqlx::PgPool) {
/// let store = PgOrderStore::new(pool)
///     .with_lock_timeout(Duration::from_secs(2))
///     .with_statement_timeout(Duration::from_secs(10));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct PgOrderStore {
    pool: PgPool,
    lock_timeout: Duration,
    statement_timeout: Duration,
}

impl PgOrderStore {
    /// Create a store with a 5 s lock timeout and 30 s statement timeout.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self {
            pool,
            lock_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_secs(30),
        }
    }

    /// Bound the wait for a product row lock.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Bound every statement inside a placement transaction.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn list(&self, buyer: Option<UserId>) -> Result<Vec<Order>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, user_id, total_amount, created_at
            FROM orders
            WHERE $1::BIGINT IS NULL OR user_id = $1
            ORDER BY created_at DESC, id DESC
            ",
        )
        .bind(buyer.map(UserId::get))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify("Failed to list orders", &e))?;

        rows.iter().map(order_from_row).collect()
    }

    async fn detail(&self, id: OrderId) -> Result<Option<OrderDetail>, StoreError> {
        let header = sqlx::query(
            r"
            SELECT o.id, o.user_id, o.total_amount, o.created_at,
                   u.name AS user_name, u.email AS user_email
            FROM orders o
            JOIN users u ON u.id = o.user_id
            WHERE o.id = $1
            ",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| classify("Failed to load order", &e))?;

        let Some(header) = header else {
            return Ok(None);
        };
        let order = order_from_row(&header)?;
        let buyer = BuyerSnapshot {
            user_id: order.buyer_id,
            name: get(&header, "user_name")?,
            email: get(&header, "user_email")?,
        };

        let rows = sqlx::query(
            r"
            SELECT oi.product_id, p.name AS product_name, oi.quantity, oi.price
            FROM order_items oi
            JOIN products p ON p.id = oi.product_id
            WHERE oi.order_id = $1
            ORDER BY oi.id
            ",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| classify("Failed to load order items", &e))?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(OrderItemView::new(
                    ProductId::new(get(row, "product_id")?),
                    get::<String>(row, "product_name")?,
                    to_u32("quantity", get(row, "quantity")?)?,
                    get(row, "price")?,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Some(OrderDetail {
            order,
            buyer,
            items,
        }))
    }
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column)
        .map_err(|e| StoreError::Unavailable(format!("Failed to decode {column}: {e}")))
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    Ok(Order {
        id: OrderId::new(get(row, "id")?),
        buyer_id: UserId::new(get(row, "user_id")?),
        total_amount: get(row, "total_amount")?,
        created_at: get(row, "created_at")?,
    })
}

fn millis(d: Duration) -> String {
    format!("{}ms", d.as_millis().max(1))
}

impl OrderStore for PgOrderStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn OrderTransaction>> {
        Box::pin(async move {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| classify("Failed to start transaction", &e))?;

            sqlx::query("SELECT set_config('lock_timeout', $1, true), set_config('statement_timeout', $2, true)")
                .bind(millis(self.lock_timeout))
                .bind(millis(self.statement_timeout))
                .execute(&mut *tx)
                .await
                .map_err(|e| classify("Failed to set transaction timeouts", &e))?;

            let tx: Box<dyn OrderTransaction> = Box::new(PgOrderTransaction { tx });
            Ok(tx)
        })
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(self.list(None))
    }

    fn list_for_buyer(&self, buyer: UserId) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(self.list(Some(buyer)))
    }

    fn find_detail(&self, id: OrderId) -> StoreFuture<'_, Option<OrderDetail>> {
        Box::pin(self.detail(id))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(|e| classify("Ping failed", &e))?;
            Ok(())
        })
    }
}

/// One placement transaction. Dropped without commit → rolled back when the
/// connection returns to the pool.
struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
}

impl OrderTransaction for PgOrderTransaction {
    fn lock_product(&mut self, id: ProductId) -> StoreFuture<'_, Option<LockedProduct>> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                SELECT id, price, stock
                FROM products
                WHERE id = $1
                FOR UPDATE
                ",
            )
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| classify(&format!("Failed to lock product {id}"), &e))?;

            row.map(|row| {
                let price: Decimal = get(&row, "price")?;
                Ok(LockedProduct {
                    id,
                    price,
                    stock: to_u32("stock", get(&row, "stock")?)?,
                })
            })
            .transpose()
        })
    }

    fn insert_order(&mut self, order: NewOrder) -> StoreFuture<'_, Order> {
        Box::pin(async move {
            let row = sqlx::query(
                r"
                INSERT INTO orders (user_id, total_amount)
                VALUES ($1, $2)
                RETURNING id, user_id, total_amount, created_at
                ",
            )
            .bind(order.buyer_id.get())
            .bind(order.total_amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    StoreError::UnknownBuyer(order.buyer_id)
                } else {
                    classify("Failed to insert order", &e)
                }
            })?;

            order_from_row(&row)
        })
    }

    fn insert_line(&mut self, line: OrderLine) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let quantity = i32::try_from(line.quantity)
                .map_err(|_| StoreError::Aborted(format!("quantity {} out of range", line.quantity)))?;

            sqlx::query(
                r"
                INSERT INTO order_items (order_id, product_id, quantity, price)
                VALUES ($1, $2, $3, $4)
                ",
            )
            .bind(line.order_id.get())
            .bind(line.product_id.get())
            .bind(quantity)
            .bind(line.unit_price)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify("Failed to insert order item", &e))?;
            Ok(())
        })
    }

    fn deduct_stock(&mut self, id: ProductId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let quantity = i32::try_from(quantity)
                .map_err(|_| StoreError::Aborted(format!("quantity {quantity} out of range")))?;

            sqlx::query("UPDATE products SET stock = stock - $2 WHERE id = $1")
                .bind(id.get())
                .bind(quantity)
                .execute(&mut *self.tx)
                .await
                .map_err(|e| classify(&format!("Failed to deduct stock for product {id}"), &e))?;
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx.commit().await.map_err(|e| {
                let err = classify("Commit failed", &e);
                match err {
                    StoreError::Unavailable(msg) => StoreError::Aborted(msg),
                    other => other,
                }
            })
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            self.tx
                .rollback()
                .await
                .map_err(|e| classify("Rollback failed", &e))
        })
    }
}
