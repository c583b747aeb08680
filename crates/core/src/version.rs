//! Optimistic concurrency primitives.

use crate::error::{DomainError, DomainResult};

/// Version expectation for a compare-and-swap write.
///
/// Balance records carry a monotonically increasing `version` that advances by
/// one per committed mutation. A writer states the version it read; the store
/// rejects the write with a conflict when the stored version has moved on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking (migrations, backfills).
    Any,
    /// Require the record to be at an exact version.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}
