//! Saga error types.

use gateway::GatewayError;
use inventory::InventoryError;
use ledger::LedgerError;
use thiserror::Error;

use crate::bus::BusError;

/// Errors raised by event handlers and background tasks.
#[derive(Debug, Error)]
pub enum SagaError {
    #[error("Inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl SagaError {
    /// Returns true if redelivering the same event cannot succeed.
    pub fn is_permanent(&self) -> bool {
        match self {
            SagaError::Inventory(e) => e.is_permanent(),
            SagaError::Ledger(e) => e.is_permanent(),
            SagaError::Bus(_) | SagaError::Gateway(_) => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
