//! Domain types for order placement.
//!
//! Identifiers are strong newtypes over the `BIGSERIAL` keys used by the
//! relational store. Money is [`Decimal`] throughout; nothing in this crate
//! touches floating point for amounts.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a product row.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    /// Creates a new `ProductId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Creates a new `OrderId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user (buyer or operator).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    /// Creates a new `UserId`.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw key.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role attached to an authenticated caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular buyer; sees only their own orders
    Customer,
    /// Privileged operator; sees every order
    Admin,
}

impl Role {
    /// Database / header string for this role.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Admin => "admin",
        }
    }

    /// Parse a role string. Unknown roles are treated as non-privileged.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("admin") {
            Self::Admin
        } else {
            Self::Customer
        }
    }

    /// Whether this role may read every order.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(self, Self::Admin)
    }
}

/// Identity of the current caller, as established by the authentication
/// boundary. Trusted as-is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    /// The caller's user id
    pub id: UserId,
    /// The caller's email (carried into the invoice job)
    pub email: String,
    /// The caller's role
    pub role: Role,
}

impl Caller {
    /// Creates a new caller identity.
    #[must_use]
    pub fn new(id: UserId, email: impl Into<String>, role: Role) -> Self {
        Self {
            id,
            email: email.into(),
            role,
        }
    }

    /// Whether the caller may read `buyer`'s orders.
    #[must_use]
    pub fn can_read_orders_of(&self, buyer: UserId) -> bool {
        self.role.is_privileged() || self.id == buyer
    }
}

/// One requested `(product, quantity)` line of a cart.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Product being ordered
    pub product_id: ProductId,
    /// Requested quantity (must be positive)
    pub quantity: u32,
}

impl CartLine {
    /// Creates a new cart line.
    #[must_use]
    pub const fn new(product_id: ProductId, quantity: u32) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// A product row as observed under its exclusive row lock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockedProduct {
    /// Product id
    pub id: ProductId,
    /// Current unit price
    pub price: Decimal,
    /// Current stock
    pub stock: u32,
}

/// Values needed to insert an order header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewOrder {
    /// Buyer placing the order
    pub buyer_id: UserId,
    /// Sum of line subtotals at locked prices
    pub total_amount: Decimal,
}

/// A committed order header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id
    pub id: OrderId,
    /// Buyer who placed the order
    #[serde(rename = "user_id")]
    pub buyer_id: UserId,
    /// Total amount, fixed at placement time
    pub total_amount: Decimal,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A line of a committed order with its captured unit price.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Owning order
    pub order_id: OrderId,
    /// Referenced product
    pub product_id: ProductId,
    /// Quantity ordered
    pub quantity: u32,
    /// Price per unit at the time the order was placed
    pub unit_price: Decimal,
}

impl OrderLine {
    /// `unit_price × quantity`.
    #[must_use]
    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Buyer identity as stored alongside the order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerSnapshot {
    /// Buyer id
    pub user_id: UserId,
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
}

/// Order line joined with its product name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItemView {
    /// Referenced product
    pub product_id: ProductId,
    /// Product name (current)
    pub product_name: String,
    /// Quantity ordered
    pub quantity: u32,
    /// Captured unit price
    pub unit_price: Decimal,
    /// `unit_price × quantity`
    pub subtotal: Decimal,
}

impl OrderItemView {
    /// Builds a view row, computing the subtotal from the captured price.
    #[must_use]
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            subtotal: unit_price * Decimal::from(quantity),
        }
    }
}

/// An order header joined with its buyer and line items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    /// Order header
    #[serde(flatten)]
    pub order: Order,
    /// Buyer identity
    pub buyer: BuyerSnapshot,
    /// Line items in insertion order
    pub items: Vec<OrderItemView>,
}

impl OrderDetail {
    /// Sum of item subtotals. Equal to `order.total_amount` for every
    /// order written by the coordinator.
    #[must_use]
    pub fn items_total(&self) -> Decimal {
        self.items.iter().map(|item| item.subtotal).sum()
    }
}
