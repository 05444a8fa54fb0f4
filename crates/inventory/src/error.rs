use thiserror::Error;

use crate::{CellId, CellStatus, DrawId, OrderId};

/// Errors that can occur when interacting with the number inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// One or more requested cells cannot be reserved. The message is safe
    /// to show to the end user.
    #[error("{reason}")]
    NotAvailable { reason: String },

    /// A cell was asked to move to Sold without being Reserved by the
    /// completing order. The order and inventory services disagree.
    #[error(
        "Saga inconsistency: cell {cell_id} is {status} (reserved by {reserved_by:?}), expected Reserved for order {order_id}"
    )]
    SagaInconsistency {
        cell_id: CellId,
        order_id: OrderId,
        status: CellStatus,
        reserved_by: Option<OrderId>,
    },

    /// A cell referenced by an event does not exist.
    #[error("Cell not found: {0}")]
    CellNotFound(CellId),

    #[error("Draw not found: {0}")]
    DrawNotFound(DrawId),

    #[error("Draw already configured: {0}")]
    DrawAlreadyConfigured(DrawId),

    /// The draw configuration is rejected.
    #[error("Invalid draw: {0}")]
    InvalidDraw(String),

    /// A concurrent writer changed a cell between read and write.
    #[error("Concurrency conflict on cell {cell_id}")]
    ConcurrencyConflict { cell_id: CellId },

    /// A stored row could not be decoded.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl InventoryError {
    pub(crate) fn not_available(reason: impl Into<String>) -> Self {
        InventoryError::NotAvailable {
            reason: reason.into(),
        }
    }

    /// Returns true for failures a retry cannot fix.
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self,
            InventoryError::Database(_) | InventoryError::ConcurrencyConflict { .. }
        )
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
