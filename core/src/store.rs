//! Inventory and order store abstractions.
//!
//! The coordinator talks to the relational store through two traits:
//!
//! - [`OrderStore`]: pool-level handle. Opens transactions and serves the
//!   read-side queries (listings, order detail).
//! - [`OrderTransaction`]: one open transaction holding one pooled
//!   connection. Row locks taken through it live until `commit` or
//!   `rollback`.
//!
//! A transaction that is dropped without `commit` is rolled back and its
//! locks are released, so every exit path (including a cancelled task)
//! resolves the transaction.
//!
//! # Implementations
//!
//! - `PgOrderStore` (in `orderdesk-postgres`): `SELECT ... FOR UPDATE` with
//!   bounded `lock_timeout`
//! - `InMemoryOrderStore` (in `orderdesk-testing`): per-product async mutexes
//!
//! # Dyn Compatibility
//!
//! Both traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! that they can be held as `Arc<dyn OrderStore>` / `Box<dyn OrderTransaction>`.

use crate::error::StoreError;
use crate::types::{LockedProduct, NewOrder, Order, OrderDetail, OrderId, OrderLine, ProductId, UserId};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Pool-level access to products and orders.
pub trait OrderStore: Send + Sync {
    /// Open a transaction on a pooled connection.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if no connection can be acquired.
    fn begin(&self) -> StoreFuture<'_, Box<dyn OrderTransaction>>;

    /// Every order header, newest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on query failure.
    fn list_all(&self) -> StoreFuture<'_, Vec<Order>>;

    /// Order headers placed by `buyer`, newest first.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on query failure.
    fn list_for_buyer(&self, buyer: UserId) -> StoreFuture<'_, Vec<Order>>;

    /// Order header joined with buyer identity and line items (with product
    /// names). Reads committed state only.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] on query failure.
    fn find_detail(&self, id: OrderId) -> StoreFuture<'_, Option<OrderDetail>>;

    /// Cheap reachability check.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the store cannot be reached.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// An open store transaction.
pub trait OrderTransaction: Send {
    /// Take an exclusive row lock on a product and read its price and stock
    /// under that lock. `None` if the product does not exist.
    ///
    /// Blocks while another transaction holds the lock, up to the store's
    /// lock timeout.
    ///
    /// # Errors
    ///
    /// [`StoreError::Aborted`] on lock timeout or deadlock.
    fn lock_product(&mut self, id: ProductId) -> StoreFuture<'_, Option<LockedProduct>>;

    /// Insert the order header and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on write failure.
    fn insert_order(&mut self, order: NewOrder) -> StoreFuture<'_, Order>;

    /// Insert one order line.
    ///
    /// # Errors
    ///
    /// [`StoreError`] on write failure.
    fn insert_line(&mut self, line: OrderLine) -> StoreFuture<'_, ()>;

    /// Decrement a locked product's stock.
    ///
    /// # Errors
    ///
    /// [`StoreError::Aborted`] if the decrement would drive stock negative.
    fn deduct_stock(&mut self, id: ProductId, quantity: u32) -> StoreFuture<'_, ()>;

    /// Commit, making every write visible and releasing all locks.
    ///
    /// # Errors
    ///
    /// [`StoreError::Aborted`] if the commit fails. Nothing is visible.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;

    /// Roll back, discarding writes and releasing all locks.
    ///
    /// # Errors
    ///
    /// [`StoreError::Unavailable`] if the rollback could not be sent. The
    /// store discards the transaction anyway once the connection is closed.
    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}
