use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{BalanceId, DomainError, DomainResult, ProductId, WarehouseId};

/// The identity triple a balance is keyed on.
///
/// `variant: None` means the base, non-variant product. At most one *active*
/// balance may exist per triple; the store enforces this on create and on any
/// path that could re-activate a record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BalanceIdentity {
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub warehouse_id: WarehouseId,
}

/// Input for creating a balance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBalance {
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reorder_point: i64,
}

/// Current quantity on hand for one (product, variant, warehouse) triple.
///
/// Quantity is only ever changed through the adjustment service, which pairs
/// every change with a movement log entry. `version` advances by one per
/// committed write and backs the store's compare-and-swap contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub id: BalanceId,
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub warehouse_id: WarehouseId,
    pub quantity: i64,
    pub reorder_point: i64,
    pub deleted: bool,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BalanceRecord {
    /// Validate and build a fresh record at version 1.
    pub fn create(id: BalanceId, new: NewBalance, now: DateTime<Utc>) -> DomainResult<Self> {
        if new.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }
        if new.reorder_point < 0 {
            return Err(DomainError::validation("reorder point cannot be negative"));
        }
        let variant = normalize_variant(new.variant)?;

        Ok(Self {
            id,
            product_id: new.product_id,
            variant,
            warehouse_id: new.warehouse_id,
            quantity: new.quantity,
            reorder_point: new.reorder_point,
            deleted: false,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn identity(&self) -> BalanceIdentity {
        BalanceIdentity {
            product_id: self.product_id,
            variant: self.variant.clone(),
            warehouse_id: self.warehouse_id,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Low stock means at or below the reorder point.
    pub fn is_low_stock(&self) -> bool {
        self.quantity <= self.reorder_point
    }

    pub fn is_out_of_stock(&self) -> bool {
        self.quantity == 0
    }

    /// Copy with a committed quantity write applied (version advances).
    pub fn with_quantity(&self, quantity: i64, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.quantity = quantity;
        next.version += 1;
        next.updated_at = now;
        next
    }

    /// Copy with a non-quantity patch applied (version advances).
    pub fn with_patch(&self, patch: BalancePatch, now: DateTime<Utc>) -> DomainResult<Self> {
        let mut next = self.clone();
        if let Some(reorder_point) = patch.reorder_point {
            if reorder_point < 0 {
                return Err(DomainError::validation("reorder point cannot be negative"));
            }
            next.reorder_point = reorder_point;
        }
        next.version += 1;
        next.updated_at = now;
        Ok(next)
    }
}

/// Direct field patch. Deliberately excludes quantity: every quantity change,
/// including manual corrections, must flow through the adjustment service so
/// the movement log stays gap-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BalancePatch {
    pub reorder_point: Option<i64>,
}

fn normalize_variant(variant: Option<String>) -> DomainResult<Option<String>> {
    match variant {
        None => Ok(None),
        Some(v) => {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                return Err(DomainError::validation(
                    "variant name cannot be blank; omit it for the base product",
                ));
            }
            Ok(Some(trimmed.to_string()))
        }
    }
}
