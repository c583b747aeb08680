//! Sales-side integration port.
//!
//! Order and invoice creation live outside this core. Whether fulfilling an
//! order deducts stock is a wiring decision, made explicit here instead of
//! leaving the two subsystems silently disconnected: callers pick an
//! implementation at composition time.

use serde::{Deserialize, Serialize};

use stockledger_core::{BalanceId, DomainResult};

/// One order line resolved to the balance it draws from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FulfillmentLine {
    pub balance_id: BalanceId,
    pub quantity: i64,
}

/// Seam between order fulfillment and the stock ledger.
pub trait FulfillmentIntegration: Send + Sync {
    /// Called once per fulfilled order, with every line of that order.
    fn order_fulfilled(&self, lines: &[FulfillmentLine]) -> DomainResult<()>;
}

impl<T> FulfillmentIntegration for std::sync::Arc<T>
where
    T: FulfillmentIntegration + ?Sized,
{
    fn order_fulfilled(&self, lines: &[FulfillmentLine]) -> DomainResult<()> {
        (**self).order_fulfilled(lines)
    }
}

/// Fulfillment that leaves the ledger alone.
///
/// Stock is maintained by hand through the adjustment surface; orders never
/// touch quantities. This is the behavior of deployments that count stock
/// manually, kept as a first-class choice.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualBookkeeping;

impl FulfillmentIntegration for ManualBookkeeping {
    fn order_fulfilled(&self, _lines: &[FulfillmentLine]) -> DomainResult<()> {
        Ok(())
    }
}
