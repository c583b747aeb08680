use std::sync::Arc;

use stockledger_core::{
    BalanceId, DomainResult, ExpectedVersion, Page, PageRequest, ProductId, WarehouseId,
};
use stockledger_ledger::{BalancePatch, BalanceRecord, NewBalance};

/// Listing filter; `None` fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceFilter {
    pub product_id: Option<ProductId>,
    pub warehouse_id: Option<WarehouseId>,
}

impl BalanceFilter {
    pub fn matches(&self, record: &BalanceRecord) -> bool {
        self.product_id.is_none_or(|p| p == record.product_id)
            && self.warehouse_id.is_none_or(|w| w == record.warehouse_id)
    }
}

/// Storage boundary for balance records.
///
/// ## Implementation requirements
///
/// - At most one active (non-deleted) record per (product, variant, warehouse)
///   triple; `create` fails with `Conflict` while the triple is held.
/// - `get` treats soft-deleted records as absent (`NotFound`).
/// - `compare_and_swap_quantity` must be atomic: the version check and the
///   quantity write happen under one lock or one database statement, and the
///   stored version advances by exactly one on success. This is the only
///   quantity-writing operation; `patch` must refuse quantity edits.
/// - Soft deletion retains the row (the movement log references it) but frees
///   the identity triple for re-creation.
pub trait BalanceStore: Send + Sync {
    fn create(&self, new: NewBalance) -> DomainResult<BalanceRecord>;

    fn get(&self, id: BalanceId) -> DomainResult<BalanceRecord>;

    fn list(&self, filter: &BalanceFilter, page: PageRequest) -> DomainResult<Page<BalanceRecord>>;

    /// Direct patch of non-quantity fields.
    fn patch(&self, id: BalanceId, patch: BalancePatch) -> DomainResult<BalanceRecord>;

    fn soft_delete(&self, id: BalanceId) -> DomainResult<()>;

    /// Atomic conditional write: succeeds only when the stored version matches
    /// `expected`, else fails with `Conflict` and changes nothing.
    fn compare_and_swap_quantity(
        &self,
        id: BalanceId,
        expected: ExpectedVersion,
        new_quantity: i64,
    ) -> DomainResult<BalanceRecord>;

    /// All active records for one product (reconciliation read).
    fn list_active_for_product(&self, product_id: ProductId) -> DomainResult<Vec<BalanceRecord>>;

    /// All active records across every product (summary read snapshot).
    fn snapshot_active(&self) -> DomainResult<Vec<BalanceRecord>>;
}

impl<S> BalanceStore for Arc<S>
where
    S: BalanceStore + ?Sized,
{
    fn create(&self, new: NewBalance) -> DomainResult<BalanceRecord> {
        (**self).create(new)
    }

    fn get(&self, id: BalanceId) -> DomainResult<BalanceRecord> {
        (**self).get(id)
    }

    fn list(&self, filter: &BalanceFilter, page: PageRequest) -> DomainResult<Page<BalanceRecord>> {
        (**self).list(filter, page)
    }

    fn patch(&self, id: BalanceId, patch: BalancePatch) -> DomainResult<BalanceRecord> {
        (**self).patch(id, patch)
    }

    fn soft_delete(&self, id: BalanceId) -> DomainResult<()> {
        (**self).soft_delete(id)
    }

    fn compare_and_swap_quantity(
        &self,
        id: BalanceId,
        expected: ExpectedVersion,
        new_quantity: i64,
    ) -> DomainResult<BalanceRecord> {
        (**self).compare_and_swap_quantity(id, expected, new_quantity)
    }

    fn list_active_for_product(&self, product_id: ProductId) -> DomainResult<Vec<BalanceRecord>> {
        (**self).list_active_for_product(product_id)
    }

    fn snapshot_active(&self) -> DomainResult<Vec<BalanceRecord>> {
        (**self).snapshot_active()
    }
}
