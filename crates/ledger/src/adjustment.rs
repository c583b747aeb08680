//! The adjustment decision: one pure function, parameterized by policy.
//!
//! The strict "fail when short" path and the clamped quick-adjust path are the
//! same operation with different `OnInsufficientStock` policies, chosen once
//! per call site.

use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult};

/// What to do when a deduction asks for more than is on hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnInsufficientStock {
    /// Fail with `InsufficientStock`, leaving state untouched.
    Reject,
    /// Truncate the deduction so the quantity lands on zero.
    ClampToZero,
}

/// Direction of a quick adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdjustOp {
    Add,
    Deduct,
}

impl AdjustOp {
    /// Signed delta for a positive quantity under this operation.
    pub fn signed(&self, quantity: i64) -> i64 {
        match self {
            AdjustOp::Add => quantity,
            AdjustOp::Deduct => -quantity,
        }
    }
}

/// Outcome of the decision: what to write and what to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjustmentDecision {
    pub previous_quantity: i64,
    pub new_quantity: i64,
    /// The change that will actually land (`new - previous`).
    pub applied_delta: i64,
    /// The change the caller asked for; differs only when clamped.
    pub requested_delta: i64,
}

/// Decide the quantity transition for one adjustment.
///
/// Pure and deterministic; the caller owns loading the current quantity and
/// committing the result atomically.
pub fn decide(
    current: i64,
    requested_delta: i64,
    policy: OnInsufficientStock,
) -> DomainResult<AdjustmentDecision> {
    if requested_delta == 0 {
        return Err(DomainError::validation("adjustment delta cannot be zero"));
    }

    let candidate = current + requested_delta;
    let new_quantity = if candidate < 0 {
        match policy {
            OnInsufficientStock::Reject => {
                return Err(DomainError::insufficient_stock(-requested_delta, current));
            }
            OnInsufficientStock::ClampToZero => 0,
        }
    } else {
        candidate
    };

    Ok(AdjustmentDecision {
        previous_quantity: current,
        new_quantity,
        applied_delta: new_quantity - current,
        requested_delta,
    })
}
