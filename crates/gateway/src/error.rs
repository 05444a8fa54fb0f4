use common::{ConnectionId, DrawId};
use inventory::{InventoryError, MAX_QUANTITY_PER_REQUEST};
use thiserror::Error;

/// Shown to the end user in place of any failure that is not theirs to fix.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong, please try again.";

/// Errors raised while handling a client request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("At least one item is required")]
    EmptyCart,

    #[error(
        "Quantity for number {number} must be between 1 and {max}, got {quantity}",
        max = MAX_QUANTITY_PER_REQUEST
    )]
    InvalidQuantity { number: i32, quantity: usize },

    #[error("Number {number} is outside draw {draw_id}")]
    NumberOutOfRange { draw_id: DrawId, number: i32 },

    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// The reservation event could not be handed to the bus.
    #[error("Failed to publish event: {0}")]
    Bus(String),
}

impl GatewayError {
    /// Returns true if the message can be shown to the end user as-is.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            GatewayError::EmptyCart
                | GatewayError::InvalidQuantity { .. }
                | GatewayError::NumberOutOfRange { .. }
                | GatewayError::Inventory(InventoryError::NotAvailable { .. })
                | GatewayError::Inventory(InventoryError::DrawNotFound(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
