//! Invoice documents in the `invoices` table.

use orderdesk_core::error::InvoiceStoreError;
use orderdesk_core::invoice::{Invoice, InvoiceFuture, InvoiceStore};
use orderdesk_core::types::OrderId;
use sqlx::PgPool;

/// [`InvoiceStore`] that upserts one JSONB document per order.
#[derive(Clone, Debug)]
pub struct PgInvoiceStore {
    pool: PgPool,
}

impl PgInvoiceStore {
    /// Create a store on `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl InvoiceStore for PgInvoiceStore {
    fn save<'a>(&'a self, invoice: &'a Invoice) -> InvoiceFuture<'a, ()> {
        Box::pin(async move {
            let document = serde_json::to_value(invoice)
                .map_err(|e| InvoiceStoreError::Serialization(e.to_string()))?;

            sqlx::query(
                r"
                INSERT INTO invoices (order_id, invoice_id, document, generated_at, updated_at)
                VALUES ($1, $2, $3, $4, now())
                ON CONFLICT (order_id) DO UPDATE
                SET invoice_id = EXCLUDED.invoice_id,
                    document = EXCLUDED.document,
                    generated_at = EXCLUDED.generated_at,
                    updated_at = now()
                ",
            )
            .bind(invoice.order_id.get())
            .bind(&invoice.invoice_id)
            .bind(document)
            .bind(invoice.generated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| InvoiceStoreError::DatabaseError(format!("Failed to save invoice: {e}")))?;

            Ok(())
        })
    }

    fn load(&self, order_id: OrderId) -> InvoiceFuture<'_, Option<Invoice>> {
        Box::pin(async move {
            let document: Option<serde_json::Value> =
                sqlx::query_scalar("SELECT document FROM invoices WHERE order_id = $1")
                    .bind(order_id.get())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| {
                        InvoiceStoreError::DatabaseError(format!("Failed to load invoice: {e}"))
                    })?;

            document
                .map(|doc| {
                    serde_json::from_value(doc)
                        .map_err(|e| InvoiceStoreError::Serialization(e.to_string()))
                })
                .transpose()
        })
    }
}
