//! Adjustment orchestration: the only write path that changes a quantity.
//!
//! Every ledgered change runs the same pipeline:
//!
//! ```text
//! AdjustmentCommand
//!   ↓
//! 1. Load the balance record (NotFound if missing or soft-deleted)
//!   ↓
//! 2. Decide the quantity transition (pure, policy-aware)
//!   ↓
//! 3. Compare-and-swap the quantity at the loaded version
//!   ↓  (Conflict → retry from step 1, bounded)
//! 4. Append the movement record (previous/new from the winning read)
//!   ↓
//! 5. Resync the product's denormalized total
//! ```
//!
//! The CAS in step 3 is what keeps the movement log truthful under
//! contention: a movement is only written with the previous/new pair of the
//! read that actually committed, so the log always agrees with the write
//! order the store accepted. Validation failures reject before step 1 and
//! domain failures leave balance and log untouched.

use chrono::Utc;
use tracing::{debug, warn};

use stockledger_core::{ActorId, BalanceId, DomainError, DomainResult, ExpectedVersion, MovementId};
use stockledger_ledger::{
    AdjustOp, BalanceRecord, FulfillmentIntegration, FulfillmentLine, MovementKind,
    MovementRecord, OnInsufficientStock, decide,
};

use crate::balance_store::BalanceStore;
use crate::movement_log::MovementLog;
use crate::product_directory::ProductDirectory;
use crate::reconciliation::recompute_total;

/// CAS attempts before the conflict is surfaced to the caller.
const MAX_CAS_ATTEMPTS: u32 = 8;

/// One fully-specified ledgered quantity change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentCommand {
    pub balance_id: BalanceId,
    pub kind: MovementKind,
    /// Signed requested change; positive receives, negative deducts.
    pub delta: i64,
    pub policy: OnInsufficientStock,
    pub notes: Option<String>,
    pub actor: Option<ActorId>,
}

/// What a committed adjustment produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdjustmentOutcome {
    pub balance: BalanceRecord,
    pub movement: MovementRecord,
}

/// Orchestrates balance writes, movement appends and total resyncs.
#[derive(Debug, Clone)]
pub struct AdjustmentService<B, M, P> {
    balances: B,
    movements: M,
    directory: P,
}

impl<B, M, P> AdjustmentService<B, M, P>
where
    B: BalanceStore,
    M: MovementLog,
    P: ProductDirectory,
{
    pub fn new(balances: B, movements: M, directory: P) -> Self {
        Self {
            balances,
            movements,
            directory,
        }
    }

    /// Strict deduction: fails with `InsufficientStock` when `quantity`
    /// exceeds what is on hand, leaving all state unchanged.
    pub fn adjust(
        &self,
        balance_id: BalanceId,
        quantity: i64,
        reason: impl Into<String>,
    ) -> DomainResult<AdjustmentOutcome> {
        ensure_positive(quantity)?;
        self.apply(AdjustmentCommand {
            balance_id,
            kind: MovementKind::Adjustment,
            delta: -quantity,
            policy: OnInsufficientStock::Reject,
            notes: Some(reason.into()),
            actor: None,
        })
    }

    /// Clamped add/deduct: deducting more than available lands the quantity
    /// on zero instead of failing. The movement keeps both the applied and
    /// the requested delta, so the truncation stays visible in the audit
    /// trail.
    pub fn quick_adjust(
        &self,
        balance_id: BalanceId,
        operation: AdjustOp,
        quantity: i64,
        notes: Option<String>,
    ) -> DomainResult<AdjustmentOutcome> {
        ensure_positive(quantity)?;
        self.apply(AdjustmentCommand {
            balance_id,
            kind: MovementKind::Adjustment,
            delta: operation.signed(quantity),
            policy: OnInsufficientStock::ClampToZero,
            notes,
            actor: None,
        })
    }

    /// Stock-take correction: moves the quantity to `counted_quantity` and
    /// ledgers the difference, so manual corrections leave no audit gap.
    /// Returns `None` when the count already matches (nothing is written).
    pub fn correct(
        &self,
        balance_id: BalanceId,
        counted_quantity: i64,
        notes: Option<String>,
    ) -> DomainResult<Option<AdjustmentOutcome>> {
        if counted_quantity < 0 {
            return Err(DomainError::validation(
                "counted quantity cannot be negative",
            ));
        }

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let record = self.balances.get(balance_id)?;
            let delta = counted_quantity - record.quantity;
            if delta == 0 {
                debug!(balance_id = %balance_id, counted_quantity, "count matches, nothing to correct");
                return Ok(None);
            }

            // counted_quantity >= 0, so the transition never goes below zero
            // and the policy cannot fire.
            match self.try_commit(
                &record,
                MovementKind::Adjustment,
                delta,
                OnInsufficientStock::Reject,
                notes.clone(),
                None,
            ) {
                Ok(outcome) => return Ok(Some(outcome)),
                Err(DomainError::Conflict(reason)) => {
                    warn!(balance_id = %balance_id, attempt, %reason, "correction lost the version race, retrying");
                }
                Err(other) => return Err(other),
            }
        }

        Err(retries_exhausted(balance_id))
    }

    /// Run one fully-specified command through the pipeline.
    ///
    /// This is the entry point for the non-adjustment movement kinds
    /// (purchase, sale, transfer, return, damage) and for callers that need
    /// to attach an actor.
    pub fn apply(&self, command: AdjustmentCommand) -> DomainResult<AdjustmentOutcome> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let record = self.balances.get(command.balance_id)?;
            match self.try_commit(
                &record,
                command.kind,
                command.delta,
                command.policy,
                command.notes.clone(),
                command.actor,
            ) {
                Ok(outcome) => return Ok(outcome),
                Err(DomainError::Conflict(reason)) => {
                    warn!(
                        balance_id = %command.balance_id,
                        attempt,
                        %reason,
                        "adjustment lost the version race, retrying"
                    );
                }
                Err(other) => return Err(other),
            }
        }

        Err(retries_exhausted(command.balance_id))
    }

    /// One attempt: decide, CAS at the loaded version, ledger, resync.
    fn try_commit(
        &self,
        record: &BalanceRecord,
        kind: MovementKind,
        delta: i64,
        policy: OnInsufficientStock,
        notes: Option<String>,
        actor: Option<ActorId>,
    ) -> DomainResult<AdjustmentOutcome> {
        let decision = decide(record.quantity, delta, policy)?;
        let updated = self.balances.compare_and_swap_quantity(
            record.id,
            ExpectedVersion::Exact(record.version),
            decision.new_quantity,
        )?;

        let movement = MovementRecord::ledgered(
            MovementId::new(),
            &updated,
            kind,
            decision.previous_quantity,
            decision.applied_delta,
            decision.requested_delta,
            notes,
            actor,
            Utc::now(),
        );
        self.movements.append(movement.clone())?;

        let total = recompute_total(&self.balances, updated.product_id)?;
        self.directory.set_total_stock(updated.product_id, total)?;

        debug!(
            balance_id = %updated.id,
            kind = %kind,
            applied_delta = decision.applied_delta,
            new_quantity = decision.new_quantity,
            product_total = total,
            "adjustment committed"
        );
        Ok(AdjustmentOutcome {
            balance: updated,
            movement,
        })
    }
}

fn ensure_positive(quantity: i64) -> DomainResult<()> {
    if quantity <= 0 {
        return Err(DomainError::validation(
            "adjustment quantity must be positive",
        ));
    }
    Ok(())
}

fn retries_exhausted(balance_id: BalanceId) -> DomainError {
    DomainError::conflict(format!(
        "adjustment of balance {balance_id} kept losing the version race"
    ))
}

/// Fulfillment wiring that deducts every order line through the ledger.
///
/// Each line becomes a strict `sale` movement. Lines are applied one at a
/// time: when a line fails, the earlier lines of that order stay applied and
/// the error surfaces to the caller, who owns compensation or retry.
#[derive(Debug, Clone)]
pub struct LedgeredFulfillment<B, M, P> {
    service: AdjustmentService<B, M, P>,
}

impl<B, M, P> LedgeredFulfillment<B, M, P> {
    pub fn new(service: AdjustmentService<B, M, P>) -> Self {
        Self { service }
    }
}

impl<B, M, P> FulfillmentIntegration for LedgeredFulfillment<B, M, P>
where
    B: BalanceStore,
    M: MovementLog,
    P: ProductDirectory,
{
    fn order_fulfilled(&self, lines: &[FulfillmentLine]) -> DomainResult<()> {
        for line in lines {
            ensure_positive(line.quantity)?;
            self.service.apply(AdjustmentCommand {
                balance_id: line.balance_id,
                kind: MovementKind::Sale,
                delta: -line.quantity,
                policy: OnInsufficientStock::Reject,
                notes: None,
                actor: None,
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use stockledger_core::{ProductId, WarehouseId};
    use stockledger_ledger::{BalanceRecord, NewBalance};

    use crate::balance_store::InMemoryBalanceStore;
    use crate::movement_log::InMemoryMovementLog;
    use crate::product_directory::InMemoryProductDirectory;

    type Service = AdjustmentService<
        Arc<InMemoryBalanceStore>,
        Arc<InMemoryMovementLog>,
        Arc<InMemoryProductDirectory>,
    >;

    struct Fixture {
        balances: Arc<InMemoryBalanceStore>,
        movements: Arc<InMemoryMovementLog>,
        directory: Arc<InMemoryProductDirectory>,
        service: Service,
    }

    fn fixture() -> Fixture {
        let balances = Arc::new(InMemoryBalanceStore::new());
        let movements = Arc::new(InMemoryMovementLog::new());
        let directory = Arc::new(InMemoryProductDirectory::new());
        let service =
            AdjustmentService::new(balances.clone(), movements.clone(), directory.clone());
        Fixture {
            balances,
            movements,
            directory,
            service,
        }
    }

    fn seed(f: &Fixture, quantity: i64) -> BalanceRecord {
        f.balances
            .create(NewBalance {
                product_id: ProductId::new(),
                variant: None,
                warehouse_id: WarehouseId::new(),
                quantity,
                reorder_point: 0,
            })
            .unwrap()
    }

    #[test]
    fn strict_adjust_deducts_and_ledgers_one_movement() {
        let f = fixture();
        let record = seed(&f, 15);

        let outcome = f.service.adjust(record.id, 6, "cycle count").unwrap();
        assert_eq!(outcome.balance.quantity, 9);
        assert_eq!(outcome.movement.kind, MovementKind::Adjustment);
        assert_eq!(outcome.movement.delta, -6);
        assert_eq!(outcome.movement.previous_quantity, 15);
        assert_eq!(outcome.movement.new_quantity, 9);
        assert_eq!(outcome.movement.notes.as_deref(), Some("cycle count"));

        let history = f.movements.list_for_balance(record.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(f.directory.total_stock(record.product_id).unwrap(), Some(9));
    }

    #[test]
    fn strict_adjust_beyond_stock_changes_nothing() {
        let f = fixture();
        let record = seed(&f, 8);

        let err = f.service.adjust(record.id, 9, "oversell").unwrap_err();
        assert_eq!(
            err,
            DomainError::InsufficientStock {
                requested: 9,
                available: 8
            }
        );

        assert_eq!(f.balances.get(record.id).unwrap().quantity, 8);
        assert!(f.movements.is_empty());
        assert_eq!(f.directory.total_stock(record.product_id).unwrap(), None);
    }

    #[test]
    fn non_positive_quantities_reject_before_any_read() {
        let f = fixture();
        // A balance id that does not exist: validation must win over NotFound.
        let bogus = BalanceId::new();

        let err = f.service.adjust(bogus, 0, "noop").unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        let err = f
            .service
            .quick_adjust(bogus, AdjustOp::Deduct, -3, None)
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn missing_balance_is_not_found() {
        let f = fixture();
        let err = f.service.adjust(BalanceId::new(), 1, "ghost").unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn quick_adjust_add_raises_the_quantity() {
        let f = fixture();
        let record = seed(&f, 2);

        let outcome = f
            .service
            .quick_adjust(record.id, AdjustOp::Add, 5, Some("restock".into()))
            .unwrap();
        assert_eq!(outcome.balance.quantity, 7);
        assert_eq!(outcome.movement.delta, 5);
        assert_eq!(outcome.movement.requested_delta, 5);
        assert!(!outcome.movement.was_clamped());
        assert_eq!(f.directory.total_stock(record.product_id).unwrap(), Some(7));
    }

    #[test]
    fn quick_adjust_deduct_clamps_to_zero_and_keeps_the_request() {
        let f = fixture();
        let record = seed(&f, 3);

        let outcome = f
            .service
            .quick_adjust(record.id, AdjustOp::Deduct, 10, None)
            .unwrap();
        assert_eq!(outcome.balance.quantity, 0);
        assert_eq!(outcome.movement.delta, -3);
        assert_eq!(outcome.movement.requested_delta, -10);
        assert!(outcome.movement.was_clamped());
        assert!(outcome.movement.is_consistent());
    }

    #[test]
    fn correct_moves_to_the_counted_quantity_and_ledgers_the_difference() {
        let f = fixture();
        let record = seed(&f, 12);

        let outcome = f
            .service
            .correct(record.id, 7, Some("annual stocktake".into()))
            .unwrap()
            .unwrap();
        assert_eq!(outcome.balance.quantity, 7);
        assert_eq!(outcome.movement.delta, -5);
        assert_eq!(outcome.movement.previous_quantity, 12);

        // Counting upward works the same way.
        let outcome = f.service.correct(record.id, 20, None).unwrap().unwrap();
        assert_eq!(outcome.balance.quantity, 20);
        assert_eq!(outcome.movement.delta, 13);
        assert_eq!(
            f.directory.total_stock(record.product_id).unwrap(),
            Some(20)
        );
    }

    #[test]
    fn correct_with_a_matching_count_writes_nothing() {
        let f = fixture();
        let record = seed(&f, 9);

        assert!(f.service.correct(record.id, 9, None).unwrap().is_none());
        assert!(f.movements.is_empty());
        assert_eq!(f.balances.get(record.id).unwrap().version, record.version);

        let err = f.service.correct(record.id, -1, None).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn apply_supports_the_other_movement_kinds() {
        let f = fixture();
        let record = seed(&f, 0);
        let actor = ActorId::new();

        let outcome = f
            .service
            .apply(AdjustmentCommand {
                balance_id: record.id,
                kind: MovementKind::Purchase,
                delta: 40,
                policy: OnInsufficientStock::Reject,
                notes: Some("PO-1042 received".into()),
                actor: Some(actor),
            })
            .unwrap();
        assert_eq!(outcome.balance.quantity, 40);
        assert_eq!(outcome.movement.kind, MovementKind::Purchase);
        assert_eq!(outcome.movement.actor, Some(actor));

        let outcome = f
            .service
            .apply(AdjustmentCommand {
                balance_id: record.id,
                kind: MovementKind::Damage,
                delta: -4,
                policy: OnInsufficientStock::Reject,
                notes: None,
                actor: None,
            })
            .unwrap();
        assert_eq!(outcome.balance.quantity, 36);
        assert_eq!(outcome.movement.kind, MovementKind::Damage);
    }

    #[test]
    fn ledgered_fulfillment_deducts_each_line_as_a_sale() {
        let f = fixture();
        let a = seed(&f, 10);
        let b = seed(&f, 5);

        let hook = LedgeredFulfillment::new(f.service.clone());
        hook.order_fulfilled(&[
            FulfillmentLine {
                balance_id: a.id,
                quantity: 4,
            },
            FulfillmentLine {
                balance_id: b.id,
                quantity: 5,
            },
        ])
        .unwrap();

        assert_eq!(f.balances.get(a.id).unwrap().quantity, 6);
        assert_eq!(f.balances.get(b.id).unwrap().quantity, 0);
        let history = f.movements.list_for_balance(a.id).unwrap();
        assert_eq!(history[0].kind, MovementKind::Sale);
    }

    #[test]
    fn ledgered_fulfillment_stops_at_the_failing_line() {
        let f = fixture();
        let a = seed(&f, 10);
        let b = seed(&f, 2);

        let hook = LedgeredFulfillment::new(f.service.clone());
        let err = hook
            .order_fulfilled(&[
                FulfillmentLine {
                    balance_id: a.id,
                    quantity: 4,
                },
                FulfillmentLine {
                    balance_id: b.id,
                    quantity: 3,
                },
            ])
            .unwrap_err();
        assert!(matches!(err, DomainError::InsufficientStock { .. }));

        // The first line stays applied; compensation is the caller's call.
        assert_eq!(f.balances.get(a.id).unwrap().quantity, 6);
        assert_eq!(f.balances.get(b.id).unwrap().quantity, 2);
    }
}
