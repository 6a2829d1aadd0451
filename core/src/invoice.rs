//! Invoice document and its storage contract.
//!
//! An [`Invoice`] is a pure projection of a committed [`OrderDetail`].
//! Projecting the same order twice yields documents that differ at most in
//! `generated_at`, and stores overwrite by order id, so regenerating after a
//! redelivery is harmless.

use crate::error::InvoiceStoreError;
use crate::types::{OrderDetail, OrderId, ProductId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by invoice store operations.
pub type InvoiceFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, InvoiceStoreError>> + Send + 'a>>;

/// Buyer block of an invoice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceCustomer {
    /// Buyer id
    pub user_id: UserId,
    /// Buyer name
    pub name: String,
    /// Buyer email
    pub email: String,
}

/// One invoice line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItem {
    /// Product id
    pub product_id: ProductId,
    /// Product name
    pub product_name: String,
    /// Quantity ordered
    pub quantity: u32,
    /// Price captured when the order was placed
    pub unit_price: Decimal,
    /// `unit_price × quantity`
    pub subtotal: Decimal,
}

/// Persisted invoice document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// `INV-{order_id}`
    pub invoice_id: String,
    /// Invoiced order
    pub order_id: OrderId,
    /// Generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Buyer snapshot
    pub customer: InvoiceCustomer,
    /// Order creation timestamp
    pub order_date: DateTime<Utc>,
    /// Line items
    pub items: Vec<InvoiceItem>,
    /// Order total
    pub total_amount: Decimal,
}

impl Invoice {
    /// Synthetic invoice id for an order.
    #[must_use]
    pub fn id_for(order_id: OrderId) -> String {
        format!("INV-{order_id}")
    }

    /// Project a committed order into an invoice.
    #[must_use]
    pub fn project(detail: &OrderDetail, generated_at: DateTime<Utc>) -> Self {
        let items = detail
            .items
            .iter()
            .map(|item| InvoiceItem {
                product_id: item.product_id,
                product_name: item.product_name.clone(),
                quantity: item.quantity,
                unit_price: item.unit_price,
                subtotal: item.subtotal,
            })
            .collect();

        Self {
            invoice_id: Self::id_for(detail.order.id),
            order_id: detail.order.id,
            generated_at,
            customer: InvoiceCustomer {
                user_id: detail.buyer.user_id,
                name: detail.buyer.name.clone(),
                email: detail.buyer.email.clone(),
            },
            order_date: detail.order.created_at,
            items,
            total_amount: detail.order.total_amount,
        }
    }

    /// Equal in everything but `generated_at`.
    #[must_use]
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.invoice_id == other.invoice_id
            && self.order_id == other.order_id
            && self.customer == other.customer
            && self.order_date == other.order_date
            && self.items == other.items
            && self.total_amount == other.total_amount
    }
}

/// Durable invoice storage keyed by order id.
pub trait InvoiceStore: Send + Sync {
    /// Persist `invoice`, replacing any earlier document for the same order.
    ///
    /// # Errors
    ///
    /// [`InvoiceStoreError`] if the document could not be written.
    fn save<'a>(&'a self, invoice: &'a Invoice) -> InvoiceFuture<'a, ()>;

    /// Load the document for an order, if one has been generated.
    ///
    /// # Errors
    ///
    /// [`InvoiceStoreError`] if the document exists but cannot be read.
    fn load(&self, order_id: OrderId) -> InvoiceFuture<'_, Option<Invoice>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{BuyerSnapshot, Order, OrderItemView};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn detail() -> OrderDetail {
        OrderDetail {
            order: Order {
                id: OrderId::new(42),
                buyer_id: UserId::new(7),
                total_amount: dec!(25.50),
                created_at: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
            },
            buyer: BuyerSnapshot {
                user_id: UserId::new(7),
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            },
            items: vec![
                OrderItemView::new(ProductId::new(1), "Widget", 2, dec!(10.00)),
                OrderItemView::new(ProductId::new(2), "Gadget", 1, dec!(5.50)),
            ],
        }
    }

    #[test]
    fn projection_copies_order_state() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap();
        let invoice = Invoice::project(&detail(), at);

        assert_eq!(invoice.invoice_id, "INV-42");
        assert_eq!(invoice.generated_at, at);
        assert_eq!(invoice.customer.email, "ada@example.com");
        assert_eq!(invoice.items.len(), 2);
        assert_eq!(invoice.items[0].subtotal, dec!(20.00));
        assert_eq!(invoice.items[1].subtotal, dec!(5.50));
        assert_eq!(invoice.total_amount, dec!(25.50));
    }

    #[test]
    fn reprojection_is_equivalent() {
        let first = Invoice::project(&detail(), Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
        let second = Invoice::project(&detail(), Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap());

        assert_ne!(first, second);
        assert!(first.is_equivalent(&second));
    }

    #[test]
    fn document_shape() {
        let invoice = Invoice::project(&detail(), Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap());
        let json = serde_json::to_value(&invoice).unwrap();

        for key in [
            "invoice_id",
            "order_id",
            "generated_at",
            "customer",
            "order_date",
            "items",
            "total_amount",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["customer"]["user_id"], 7);
        assert_eq!(json["items"][0]["product_name"], "Widget");
    }
}
