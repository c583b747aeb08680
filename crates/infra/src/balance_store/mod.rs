//! Balance store boundary.
//!
//! Defines the storage abstraction for balance records without making storage
//! assumptions. Implementations must enforce the unique active-triple index
//! and the versioned compare-and-swap write the adjustment service relies on.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryBalanceStore;
pub use r#trait::{BalanceFilter, BalanceStore};
