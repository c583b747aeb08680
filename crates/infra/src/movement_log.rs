//! Append-only movement log boundary.
//!
//! The log is the audit trail for every ledgered quantity change. It exposes
//! no update or delete operations, and it is never consulted to derive a
//! current balance; the balance record stays authoritative.

use std::sync::{Arc, RwLock};

use stockledger_core::{BalanceId, DomainError, DomainResult};
use stockledger_ledger::{BalanceIdentity, MovementRecord};

pub trait MovementLog: Send + Sync {
    /// Append one immutable record.
    fn append(&self, record: MovementRecord) -> DomainResult<()>;

    /// Chronological (append-order) history for one balance, for audit and
    /// debugging reads.
    fn list_for_balance(&self, balance_id: BalanceId) -> DomainResult<Vec<MovementRecord>>;

    /// Chronological history for one identity triple. Soft-deleting a balance
    /// frees its triple for re-creation, so this view spans every balance
    /// record that ever held the triple.
    fn list_for_identity(&self, identity: &BalanceIdentity) -> DomainResult<Vec<MovementRecord>>;
}

impl<M> MovementLog for Arc<M>
where
    M: MovementLog + ?Sized,
{
    fn append(&self, record: MovementRecord) -> DomainResult<()> {
        (**self).append(record)
    }

    fn list_for_balance(&self, balance_id: BalanceId) -> DomainResult<Vec<MovementRecord>> {
        (**self).list_for_balance(balance_id)
    }

    fn list_for_identity(&self, identity: &BalanceIdentity) -> DomainResult<Vec<MovementRecord>> {
        (**self).list_for_identity(identity)
    }
}

/// In-memory movement log for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryMovementLog {
    records: RwLock<Vec<MovementRecord>>,
}

impl InMemoryMovementLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of records across all balances (test support).
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MovementLog for InMemoryMovementLog {
    fn append(&self, record: MovementRecord) -> DomainResult<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| DomainError::unexpected("movement log lock poisoned"))?;
        records.push(record);
        Ok(())
    }

    fn list_for_balance(&self, balance_id: BalanceId) -> DomainResult<Vec<MovementRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| DomainError::unexpected("movement log lock poisoned"))?;
        Ok(records
            .iter()
            .filter(|m| m.balance_id == balance_id)
            .cloned()
            .collect())
    }

    fn list_for_identity(&self, identity: &BalanceIdentity) -> DomainResult<Vec<MovementRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| DomainError::unexpected("movement log lock poisoned"))?;
        Ok(records
            .iter()
            .filter(|m| m.identity() == *identity)
            .cloned()
            .collect())
    }
}
