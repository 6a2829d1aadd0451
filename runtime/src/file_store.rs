//! Invoice documents as JSON files.
//!
//! One file per order at `{dir}/order_{id}.json`. Each save writes a sibling
//! temp file and renames it over the target, so readers see either the old or
//! the new document, never a truncated one.

use orderdesk_core::error::InvoiceStoreError;
use orderdesk_core::invoice::{Invoice, InvoiceFuture, InvoiceStore};
use orderdesk_core::types::OrderId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// [`InvoiceStore`] writing pretty-printed JSON files to a directory.
#[derive(Clone, Debug)]
pub struct FileInvoiceStore {
    dir: PathBuf,
}

impl FileInvoiceStore {
    /// Store invoices under `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the documents.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `order_id`.
    #[must_use]
    pub fn path_for(&self, order_id: OrderId) -> PathBuf {
        self.dir.join(format!("order_{order_id}.json"))
    }
}

fn io_error(context: &str, path: &Path, err: &std::io::Error) -> InvoiceStoreError {
    InvoiceStoreError::Io(format!("{context} {}: {err}", path.display()))
}

impl InvoiceStore for FileInvoiceStore {
    fn save<'a>(&'a self, invoice: &'a Invoice) -> InvoiceFuture<'a, ()> {
        Box::pin(async move {
            let body = serde_json::to_vec_pretty(invoice)
                .map_err(|e| InvoiceStoreError::Serialization(e.to_string()))?;

            tokio::fs::create_dir_all(&self.dir)
                .await
                .map_err(|e| io_error("failed to create", &self.dir, &e))?;

            let target = self.path_for(invoice.order_id);
            let tmp = self
                .dir
                .join(format!(".order_{}.{}.tmp", invoice.order_id, Uuid::new_v4()));

            if let Err(e) = tokio::fs::write(&tmp, &body).await {
                return Err(io_error("failed to write", &tmp, &e));
            }
            if let Err(e) = tokio::fs::rename(&tmp, &target).await {
                let _ = tokio::fs::remove_file(&tmp).await;
                return Err(io_error("failed to replace", &target, &e));
            }

            tracing::debug!(path = %target.display(), "Invoice written");
            Ok(())
        })
    }

    fn load(&self, order_id: OrderId) -> InvoiceFuture<'_, Option<Invoice>> {
        Box::pin(async move {
            let path = self.path_for(order_id);
            let body = match tokio::fs::read(&path).await {
                Ok(body) => body,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(io_error("failed to read", &path, &e)),
            };

            serde_json::from_slice(&body)
                .map(Some)
                .map_err(|e| InvoiceStoreError::Serialization(format!("{}: {e}", path.display())))
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::{TimeZone, Utc};
    use orderdesk_core::invoice::{InvoiceCustomer, InvoiceItem};
    use orderdesk_core::types::{ProductId, UserId};
    use rust_decimal_macros::dec;

    fn invoice(order: i64, generated_secs: i64) -> Invoice {
        Invoice {
            invoice_id: Invoice::id_for(OrderId::new(order)),
            order_id: OrderId::new(order),
            generated_at: Utc.timestamp_opt(generated_secs, 0).unwrap(),
            customer: InvoiceCustomer {
                user_id: UserId::new(1),
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
            },
            order_date: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            items: vec![InvoiceItem {
                product_id: ProductId::new(1),
                product_name: "Widget".to_string(),
                quantity: 2,
                unit_price: dec!(10.00),
                subtotal: dec!(20.00),
            }],
            total_amount: dec!(20.00),
        }
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInvoiceStore::new(dir.path().join("invoices"));

        store.save(&invoice(7, 1_700_000_100)).await.unwrap();

        assert!(store.path_for(OrderId::new(7)).ends_with("order_7.json"));
        let loaded = store.load(OrderId::new(7)).await.unwrap().unwrap();
        assert_eq!(loaded, invoice(7, 1_700_000_100));
    }

    #[tokio::test]
    async fn test_missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInvoiceStore::new(dir.path());

        assert!(store.load(OrderId::new(42)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resave_overwrites_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInvoiceStore::new(dir.path());

        store.save(&invoice(7, 1_700_000_100)).await.unwrap();
        store.save(&invoice(7, 1_700_000_200)).await.unwrap();

        let loaded = store.load(OrderId::new(7)).await.unwrap().unwrap();
        assert_eq!(loaded.generated_at.timestamp(), 1_700_000_200);

        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1, "temp files must not be left behind");
    }

    #[tokio::test]
    async fn test_document_is_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInvoiceStore::new(dir.path());
        store.save(&invoice(3, 1_700_000_100)).await.unwrap();

        let raw = std::fs::read_to_string(store.path_for(OrderId::new(3))).unwrap();
        assert!(raw.contains("\n  \"invoice_id\": \"INV-3\""));
    }

    #[tokio::test]
    async fn test_corrupt_document_is_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileInvoiceStore::new(dir.path());
        std::fs::write(store.path_for(OrderId::new(9)), b"{not json").unwrap();

        let err = store.load(OrderId::new(9)).await.unwrap_err();
        assert!(matches!(err, InvoiceStoreError::Serialization(_)));
    }
}
