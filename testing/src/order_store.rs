//! In-memory order store with row-lock semantics.
//!
//! Each product carries its own `tokio::sync::Mutex`. A transaction holds the
//! owned guard for every product it locked until it commits, rolls back or
//! is dropped, so concurrent placements on the same product serialize
//! exactly as they do under `SELECT ... FOR UPDATE`. Writes are buffered in
//! the transaction and applied atomically on commit; readers never observe a
//! partially built order.

#![allow(clippy::missing_panics_doc)]

use orderdesk_core::environment::Clock;
use orderdesk_core::error::StoreError;
use orderdesk_core::store::{OrderStore, OrderTransaction, StoreFuture};
use orderdesk_core::types::{
    BuyerSnapshot, LockedProduct, NewOrder, Order, OrderDetail, OrderId, OrderItemView, OrderLine,
    ProductId, UserId,
};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone)]
struct ProductRow {
    name: String,
    price: Decimal,
    stock: u32,
    lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<UserId, BuyerSnapshot>,
    products: BTreeMap<ProductId, ProductRow>,
    orders: Vec<Order>,
    lines: Vec<OrderLine>,
}

/// In-memory [`OrderStore`].
///
/// # Example
///
/// ```
/// use orderdesk_testing::{InMemoryOrderStore, test_clock};
/// use orderdesk_core::types::{ProductId, UserId};
/// use rust_decimal::Decimal;
/// use std::sync::Arc;
///
/// let store = InMemoryOrderStore::new(Arc::new(test_clock()));
/// store.add_user(UserId::new(1), "Ada", "ada@example.com");
/// store.add_product(ProductId::new(1), "Widget", Decimal::new(1000, 2), 5);
/// assert_eq!(store.stock_of(ProductId::new(1)), Some(5));
/// ```
#[derive(Clone)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
    next_order_id: Arc<AtomicI64>,
    clock: Arc<dyn Clock>,
    lock_timeout: Duration,
    fail_next_commit: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Create an empty store. Lock waits time out after 5 seconds.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            next_order_id: Arc::new(AtomicI64::new(1)),
            clock,
            lock_timeout: Duration::from_secs(5),
            fail_next_commit: Arc::new(AtomicBool::new(false)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set how long `lock_product` waits before aborting.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a user.
    pub fn add_user(&self, id: UserId, name: &str, email: &str) {
        self.tables().users.insert(
            id,
            BuyerSnapshot {
                user_id: id,
                name: name.to_string(),
                email: email.to_string(),
            },
        );
    }

    /// Seed (or replace) a product.
    pub fn add_product(&self, id: ProductId, name: &str, price: Decimal, stock: u32) {
        self.tables().products.insert(
            id,
            ProductRow {
                name: name.to_string(),
                price,
                stock,
                lock: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
    }

    /// Change a product's current price (product CRUD stand-in).
    pub fn set_price(&self, id: ProductId, price: Decimal) {
        if let Some(row) = self.tables().products.get_mut(&id) {
            row.price = price;
        }
    }

    /// Committed stock of a product.
    #[must_use]
    pub fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.tables().products.get(&id).map(|row| row.stock)
    }

    /// Number of committed orders.
    #[must_use]
    pub fn order_count(&self) -> usize {
        self.tables().orders.len()
    }

    /// Number of committed order lines.
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.tables().lines.len()
    }

    /// Committed lines of one order.
    #[must_use]
    pub fn lines_of(&self, order_id: OrderId) -> Vec<OrderLine> {
        self.tables()
            .lines
            .iter()
            .filter(|line| line.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Remove an order and its lines (simulates upstream data loss).
    pub fn delete_order(&self, order_id: OrderId) {
        let mut tables = self.tables();
        tables.orders.retain(|order| order.id != order_id);
        tables.lines.retain(|line| line.order_id != order_id);
    }

    /// Make the next `commit` fail with [`StoreError::Aborted`].
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Toggle simulated unreachability for every operation.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }

    fn sorted_newest_first(mut orders: Vec<Order>) -> Vec<Order> {
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        orders
    }
}

impl OrderStore for InMemoryOrderStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn OrderTransaction>> {
        Box::pin(async move {
            self.check_available()?;
            let tx: Box<dyn OrderTransaction> = Box::new(InMemoryTransaction {
                store: self.clone(),
                guards: HashMap::new(),
                locked: HashMap::new(),
                order: None,
                lines: Vec::new(),
                deductions: Vec::new(),
            });
            Ok(tx)
        })
    }

    fn list_all(&self) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(async move {
            self.check_available()?;
            let orders = self.tables().orders.clone();
            Ok(Self::sorted_newest_first(orders))
        })
    }

    fn list_for_buyer(&self, buyer: UserId) -> StoreFuture<'_, Vec<Order>> {
        Box::pin(async move {
            self.check_available()?;
            let orders = self
                .tables()
                .orders
                .iter()
                .filter(|order| order.buyer_id == buyer)
                .cloned()
                .collect();
            Ok(Self::sorted_newest_first(orders))
        })
    }

    fn find_detail(&self, id: OrderId) -> StoreFuture<'_, Option<OrderDetail>> {
        Box::pin(async move {
            self.check_available()?;
            let tables = self.tables();

            let Some(order) = tables.orders.iter().find(|order| order.id == id).cloned() else {
                return Ok(None);
            };
            let Some(buyer) = tables.users.get(&order.buyer_id).cloned() else {
                return Ok(None);
            };

            let items = tables
                .lines
                .iter()
                .filter(|line| line.order_id == id)
                .map(|line| {
                    let name = tables
                        .products
                        .get(&line.product_id)
                        .map(|row| row.name.clone())
                        .unwrap_or_default();
                    OrderItemView::new(line.product_id, name, line.quantity, line.unit_price)
                })
                .collect();

            Ok(Some(OrderDetail {
                order,
                buyer,
                items,
            }))
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.check_available() })
    }
}

/// Buffered in-memory transaction.
struct InMemoryTransaction {
    store: InMemoryOrderStore,
    guards: HashMap<ProductId, OwnedMutexGuard<()>>,
    locked: HashMap<ProductId, LockedProduct>,
    order: Option<Order>,
    lines: Vec<OrderLine>,
    deductions: Vec<(ProductId, u32)>,
}

impl OrderTransaction for InMemoryTransaction {
    fn lock_product(&mut self, id: ProductId) -> StoreFuture<'_, Option<LockedProduct>> {
        Box::pin(async move {
            self.store.check_available()?;
            if let Some(product) = self.locked.get(&id) {
                return Ok(Some(product.clone()));
            }

            let Some(lock) = self.store.tables().products.get(&id).map(|row| Arc::clone(&row.lock))
            else {
                return Ok(None);
            };

            let guard = tokio::time::timeout(self.store.lock_timeout, lock.lock_owned())
                .await
                .map_err(|_| {
                    StoreError::Aborted(format!("lock timeout waiting for product {id}"))
                })?;

            let product = self.store.tables().products.get(&id).map(|row| LockedProduct {
                id,
                price: row.price,
                stock: row.stock,
            });

            if let Some(product) = &product {
                self.guards.insert(id, guard);
                self.locked.insert(id, product.clone());
            }
            Ok(product)
        })
    }

    fn insert_order(&mut self, order: NewOrder) -> StoreFuture<'_, Order> {
        Box::pin(async move {
            self.store.check_available()?;
            if !self.store.tables().users.contains_key(&order.buyer_id) {
                return Err(StoreError::UnknownBuyer(order.buyer_id));
            }

            let id = self.store.next_order_id.fetch_add(1, Ordering::SeqCst);
            let row = Order {
                id: OrderId::new(id),
                buyer_id: order.buyer_id,
                total_amount: order.total_amount,
                created_at: self.store.clock.now(),
            };
            self.order = Some(row.clone());
            Ok(row)
        })
    }

    fn insert_line(&mut self, line: OrderLine) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.store.check_available()?;
            if line.quantity == 0 {
                return Err(StoreError::Aborted(
                    "check violation: quantity must be positive".to_string(),
                ));
            }
            self.lines.push(line);
            Ok(())
        })
    }

    fn deduct_stock(&mut self, id: ProductId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.store.check_available()?;
            let Some(product) = self.locked.get_mut(&id) else {
                return Err(StoreError::Aborted(format!(
                    "product {id} was not locked by this transaction"
                )));
            };
            product.stock = product.stock.checked_sub(quantity).ok_or_else(|| {
                StoreError::Aborted(format!(
                    "check violation: stock for product {id} would go negative"
                ))
            })?;
            self.deductions.push((id, quantity));
            Ok(())
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            if self.store.fail_next_commit.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Aborted("commit failed".to_string()));
            }
            self.store.check_available()?;

            let this = *self;
            {
                let mut tables = this.store.tables();
                for (id, quantity) in &this.deductions {
                    if let Some(row) = tables.products.get_mut(id) {
                        row.stock = row.stock.saturating_sub(*quantity);
                    }
                }
                if let Some(order) = this.order {
                    tables.orders.push(order);
                }
                tables.lines.extend(this.lines);
            }
            drop(this.guards);
            Ok(())
        })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move {
            drop(self);
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::mocks::test_clock;
    use rust_decimal_macros::dec;

    fn store() -> InMemoryOrderStore {
        let store = InMemoryOrderStore::new(Arc::new(test_clock()));
        store.add_user(UserId::new(1), "Ada", "ada@example.com");
        store.add_product(ProductId::new(1), "Widget", dec!(10.00), 5);
        store
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        tx.lock_product(ProductId::new(1)).await.unwrap();
        let order = tx
            .insert_order(NewOrder {
                buyer_id: UserId::new(1),
                total_amount: dec!(10.00),
            })
            .await
            .unwrap();
        tx.deduct_stock(ProductId::new(1), 1).await.unwrap();

        assert_eq!(store.order_count(), 0);
        assert!(store.find_detail(order.id).await.unwrap().is_none());
        assert_eq!(store.stock_of(ProductId::new(1)), Some(5));

        drop(tx);
        assert_eq!(store.order_count(), 0);
        assert_eq!(store.stock_of(ProductId::new(1)), Some(5));
    }

    #[tokio::test]
    async fn commit_applies_everything() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        tx.lock_product(ProductId::new(1)).await.unwrap();
        let order = tx
            .insert_order(NewOrder {
                buyer_id: UserId::new(1),
                total_amount: dec!(20.00),
            })
            .await
            .unwrap();
        tx.insert_line(OrderLine {
            order_id: order.id,
            product_id: ProductId::new(1),
            quantity: 2,
            unit_price: dec!(10.00),
        })
        .await
        .unwrap();
        tx.deduct_stock(ProductId::new(1), 2).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.stock_of(ProductId::new(1)), Some(3));
        let detail = store.find_detail(order.id).await.unwrap().unwrap();
        assert_eq!(detail.items.len(), 1);
        assert_eq!(detail.items[0].product_name, "Widget");
        assert_eq!(detail.buyer.email, "ada@example.com");
    }

    #[tokio::test]
    async fn second_locker_waits_then_times_out() {
        let store = store().with_lock_timeout(Duration::from_millis(50));
        let mut first = store.begin().await.unwrap();
        first.lock_product(ProductId::new(1)).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let err = second.lock_product(ProductId::new(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));

        first.rollback().await.unwrap();
        assert!(second.lock_product(ProductId::new(1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_product_locks_nothing() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.lock_product(ProductId::new(99)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deduct_below_zero_aborts() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        tx.lock_product(ProductId::new(1)).await.unwrap();
        let err = tx.deduct_stock(ProductId::new(1), 6).await.unwrap_err();
        assert!(matches!(err, StoreError::Aborted(_)));
    }

    #[tokio::test]
    async fn unavailable_store_fails_fast() {
        let store = store();
        store.set_unavailable(true);
        assert!(matches!(
            store.ping().await.unwrap_err(),
            StoreError::Unavailable(_)
        ));
        assert!(store.begin().await.is_err());
    }
}
