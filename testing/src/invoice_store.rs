//! In-memory invoice storage.

use orderdesk_core::error::InvoiceStoreError;
use orderdesk_core::invoice::{Invoice, InvoiceFuture, InvoiceStore};
use orderdesk_core::types::OrderId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// `HashMap`-backed [`InvoiceStore`] that counts writes.
#[derive(Clone, Debug, Default)]
pub struct InMemoryInvoiceStore {
    documents: Arc<RwLock<HashMap<OrderId, Invoice>>>,
    writes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl InMemoryInvoiceStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of successful `save` calls, including overwrites.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make `save` fail while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl InvoiceStore for InMemoryInvoiceStore {
    fn save<'a>(&'a self, invoice: &'a Invoice) -> InvoiceFuture<'a, ()> {
        Box::pin(async move {
            if self.failing.load(Ordering::SeqCst) {
                return Err(InvoiceStoreError::Io("disk full".to_string()));
            }
            self.documents
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(invoice.order_id, invoice.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn load(&self, order_id: OrderId) -> InvoiceFuture<'_, Option<Invoice>> {
        Box::pin(async move {
            Ok(self
                .documents
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&order_id)
                .cloned())
        })
    }
}
