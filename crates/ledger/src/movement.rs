use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ActorId, BalanceId, DomainError, MovementId, ProductId, WarehouseId};

use crate::balance::{BalanceIdentity, BalanceRecord};

/// Why a quantity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Purchase,
    Sale,
    Adjustment,
    Transfer,
    Return,
    Damage,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Purchase => "purchase",
            MovementKind::Sale => "sale",
            MovementKind::Adjustment => "adjustment",
            MovementKind::Transfer => "transfer",
            MovementKind::Return => "return",
            MovementKind::Damage => "damage",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(MovementKind::Purchase),
            "sale" => Ok(MovementKind::Sale),
            "adjustment" => Ok(MovementKind::Adjustment),
            "transfer" => Ok(MovementKind::Transfer),
            "return" => Ok(MovementKind::Return),
            "damage" => Ok(MovementKind::Damage),
            other => Err(DomainError::validation(format!(
                "unknown movement kind: {other}"
            ))),
        }
    }
}

/// Immutable audit record of one ledgered quantity change.
///
/// `delta` is the change actually applied, so `new_quantity = previous_quantity
/// + delta` holds on every record. When a clamped deduction truncates the
/// request, `requested_delta` preserves what the caller asked for.
///
/// Movements are never updated or deleted, and the current balance is never
/// reconstructed from them; the balance record stays authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRecord {
    pub id: MovementId,
    pub balance_id: BalanceId,
    pub product_id: ProductId,
    pub variant: Option<String>,
    pub warehouse_id: WarehouseId,
    pub kind: MovementKind,
    pub delta: i64,
    pub requested_delta: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
    pub created_at: DateTime<Utc>,
}

impl MovementRecord {
    /// Build the audit entry for a committed adjustment.
    ///
    /// `previous_quantity` and `applied_delta` must come from the read that won
    /// the compare-and-swap; `new_quantity` is derived, keeping the ledger
    /// arithmetic consistent by construction.
    #[allow(clippy::too_many_arguments)]
    pub fn ledgered(
        id: MovementId,
        balance: &BalanceRecord,
        kind: MovementKind,
        previous_quantity: i64,
        applied_delta: i64,
        requested_delta: i64,
        notes: Option<String>,
        actor: Option<ActorId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            balance_id: balance.id,
            product_id: balance.product_id,
            variant: balance.variant.clone(),
            warehouse_id: balance.warehouse_id,
            kind,
            delta: applied_delta,
            requested_delta,
            previous_quantity,
            new_quantity: previous_quantity + applied_delta,
            notes,
            actor,
            created_at: now,
        }
    }

    /// The identity triple of the balance this movement concerns.
    pub fn identity(&self) -> BalanceIdentity {
        BalanceIdentity {
            product_id: self.product_id,
            variant: self.variant.clone(),
            warehouse_id: self.warehouse_id,
        }
    }

    /// The ledger arithmetic every record must satisfy.
    pub fn is_consistent(&self) -> bool {
        self.new_quantity == self.previous_quantity + self.delta
    }

    /// True when a clamp truncated the requested change.
    pub fn was_clamped(&self) -> bool {
        self.delta != self.requested_delta
    }
}
