use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use stockledger_core::{
    BalanceId, DomainError, DomainResult, ExpectedVersion, Page, PageRequest, ProductId,
};
use stockledger_ledger::{BalanceIdentity, BalancePatch, BalanceRecord, NewBalance};

use super::r#trait::{BalanceFilter, BalanceStore};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<BalanceId, BalanceRecord>,
    /// Insertion order, for deterministic listing.
    order: Vec<BalanceId>,
    /// Unique index over active identity triples.
    active: HashMap<BalanceIdentity, BalanceId>,
}

/// In-memory balance store.
///
/// Intended for tests/dev. The write lock makes every mutation atomic,
/// including the version check inside `compare_and_swap_quantity`.
#[derive(Debug, Default)]
pub struct InMemoryBalanceStore {
    inner: RwLock<Inner>,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DomainError {
    DomainError::unexpected("balance store lock poisoned")
}

impl BalanceStore for InMemoryBalanceStore {
    fn create(&self, new: NewBalance) -> DomainResult<BalanceRecord> {
        let record = BalanceRecord::create(BalanceId::new(), new, Utc::now())?;

        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let identity = record.identity();
        if inner.active.contains_key(&identity) {
            return Err(DomainError::conflict(
                "an active balance already exists for this product, variant and warehouse",
            ));
        }

        inner.active.insert(identity, record.id);
        inner.order.push(record.id);
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn get(&self, id: BalanceId) -> DomainResult<BalanceRecord> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        inner
            .records
            .get(&id)
            .filter(|r| r.is_active())
            .cloned()
            .ok_or_else(DomainError::not_found)
    }

    fn list(&self, filter: &BalanceFilter, page: PageRequest) -> DomainResult<Page<BalanceRecord>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;

        let matching: Vec<&BalanceRecord> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| r.is_active() && filter.matches(r))
            .collect();

        let total = matching.len() as u64;
        let items = matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            page: page.page,
            limit: page.limit,
            total,
        })
    }

    fn patch(&self, id: BalanceId, patch: BalancePatch) -> DomainResult<BalanceRecord> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let record = inner
            .records
            .get(&id)
            .filter(|r| r.is_active())
            .ok_or_else(DomainError::not_found)?;

        let updated = record.with_patch(patch, Utc::now())?;
        inner.records.insert(id, updated.clone());
        Ok(updated)
    }

    fn soft_delete(&self, id: BalanceId) -> DomainResult<()> {
        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let record = inner
            .records
            .get(&id)
            .filter(|r| r.is_active())
            .ok_or_else(DomainError::not_found)?;

        let identity = record.identity();
        let mut deleted = record.clone();
        deleted.deleted = true;
        deleted.version += 1;
        deleted.updated_at = Utc::now();

        inner.active.remove(&identity);
        inner.records.insert(id, deleted);
        Ok(())
    }

    fn compare_and_swap_quantity(
        &self,
        id: BalanceId,
        expected: ExpectedVersion,
        new_quantity: i64,
    ) -> DomainResult<BalanceRecord> {
        if new_quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }

        let mut inner = self.inner.write().map_err(|_| poisoned())?;
        let record = inner
            .records
            .get(&id)
            .filter(|r| r.is_active())
            .ok_or_else(DomainError::not_found)?;

        expected.check(record.version)?;

        let updated = record.with_quantity(new_quantity, Utc::now());
        inner.records.insert(id, updated.clone());
        Ok(updated)
    }

    fn list_active_for_product(&self, product_id: ProductId) -> DomainResult<Vec<BalanceRecord>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| r.is_active() && r.product_id == product_id)
            .cloned()
            .collect())
    }

    fn snapshot_active(&self) -> DomainResult<Vec<BalanceRecord>> {
        let inner = self.inner.read().map_err(|_| poisoned())?;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|r| r.is_active())
            .cloned()
            .collect())
    }
}
