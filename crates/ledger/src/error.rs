//! Ledger error types.

use common::{OrderId, Version};
use thiserror::Error;

use crate::order::OrderError;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A business rule rejected the operation.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Another writer committed to the order first.
    #[error("Concurrency conflict for order {order_id}: expected version {expected}")]
    ConcurrencyConflict { order_id: OrderId, expected: Version },

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Returns true for failures a retry cannot fix.
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            LedgerError::Database(_) | LedgerError::ConcurrencyConflict { .. }
        )
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
