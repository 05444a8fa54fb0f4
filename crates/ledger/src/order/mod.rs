//! Order aggregate and related types.

mod aggregate;
mod commands;
mod state;
mod ticket;

pub use aggregate::{Order, OrderLine};
pub use commands::{CreateOrder, ExtendOrder};
pub use state::OrderStatus;
pub use ticket::{Ticket, TicketStatus};

use common::Money;
use thiserror::Error;

/// Business-rule violations on an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// Order is not in the expected status.
    #[error("Invalid state transition: cannot {action} from {current_status} status")]
    InvalidStateTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// An order must hold at least one cell.
    #[error("Order has no cells")]
    NoCells,

    #[error("Invalid amount: {0} (must be greater than 0)")]
    InvalidAmount(Money),

    /// The payment window closed before completion.
    #[error("Order has expired. Please create a new order.")]
    Expired,

    /// The order is terminal or past its expiry; a new order is needed instead.
    #[error("Order cannot be extended: it is {status} and expired={expired}")]
    NotExtendable { status: OrderStatus, expired: bool },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}
