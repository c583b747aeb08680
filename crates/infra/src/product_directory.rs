//! Port onto the product entity, which lives outside this core.
//!
//! The ledger needs two things from it: a display title for summary ordering,
//! and a slot for the denormalized total-stock cache. The cache is recomputed
//! in full after every mutation and is eventually consistent: a transiently
//! stale read is corrected by the next resync, and it is never treated as the
//! source of truth.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockledger_core::{DomainError, DomainResult, ProductId};

pub trait ProductDirectory: Send + Sync {
    fn title(&self, product_id: ProductId) -> DomainResult<Option<String>>;

    /// Write the recomputed denormalized total for one product.
    fn set_total_stock(&self, product_id: ProductId, total: i64) -> DomainResult<()>;

    fn total_stock(&self, product_id: ProductId) -> DomainResult<Option<i64>>;
}

impl<P> ProductDirectory for Arc<P>
where
    P: ProductDirectory + ?Sized,
{
    fn title(&self, product_id: ProductId) -> DomainResult<Option<String>> {
        (**self).title(product_id)
    }

    fn set_total_stock(&self, product_id: ProductId, total: i64) -> DomainResult<()> {
        (**self).set_total_stock(product_id, total)
    }

    fn total_stock(&self, product_id: ProductId) -> DomainResult<Option<i64>> {
        (**self).total_stock(product_id)
    }
}

#[derive(Debug, Default, Clone)]
struct ProductEntry {
    title: Option<String>,
    total_stock: Option<i64>,
}

/// In-memory directory for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryProductDirectory {
    inner: RwLock<HashMap<ProductId, ProductEntry>>,
}

impl InMemoryProductDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a product title (catalog writes are external in production).
    pub fn upsert_title(&self, product_id: ProductId, title: impl Into<String>) {
        if let Ok(mut inner) = self.inner.write() {
            inner.entry(product_id).or_default().title = Some(title.into());
        }
    }
}

fn poisoned() -> DomainError {
    DomainError::unexpected("product directory lock poisoned")
}

impl ProductDirectory for InMemoryProductDirectory {
    fn title(&self, product_id: ProductId) -> DomainResult<Option<String>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.get(&product_id).and_then(|e| e.title.clone()))
    }

    fn set_total_stock(&self, product_id: ProductId, total: i64) -> DomainResult<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        inner.entry(product_id).or_default().total_stock = Some(total);
        Ok(())
    }

    fn total_stock(&self, product_id: ProductId) -> DomainResult<Option<i64>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner.get(&product_id).and_then(|e| e.total_stock))
    }
}
