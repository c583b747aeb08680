//! Domain error model.

use thiserror::Error;

/// Result type used across the ledger.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic business failures (validation,
/// conflicts, stock shortfalls). Storage faults are wrapped as `Unexpected`
/// with internal detail logged, never leaked to callers verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. non-positive quantity).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A requested record was not found (missing or soft-deleted).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (duplicate identity or stale version).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A strict deduction asked for more than is on hand.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// An infrastructure fault surfaced through the domain boundary.
    #[error("unexpected failure: {0}")]
    Unexpected(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_names_both_sides() {
        let err = DomainError::insufficient_stock(5, 3);
        assert_eq!(err.to_string(), "insufficient stock: requested 5, available 3");
    }

    #[test]
    fn conflict_carries_detail() {
        let err = DomainError::conflict("active balance exists");
        assert_eq!(err.to_string(), "conflict: active balance exists");
    }
}
