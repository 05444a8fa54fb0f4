//! Tickets issued when an order completes.

use chrono::{DateTime, Utc};
use common::{CellId, DrawId, Money, OrderId, TicketId, UserId};
use serde::{Deserialize, Serialize};

use super::OrderError;

/// Lifecycle of a ticket after purchase. Only `Active` is set by the ledger;
/// the rest belong to prize settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TicketStatus {
    #[default]
    Active,
    Won,
    Lost,
    Refunded,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Active => "Active",
            TicketStatus::Won => "Won",
            TicketStatus::Lost => "Lost",
            TicketStatus::Refunded => "Refunded",
        }
    }
}

impl std::fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TicketStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(TicketStatus::Active),
            "Won" => Ok(TicketStatus::Won),
            "Lost" => Ok(TicketStatus::Lost),
            "Refunded" => Ok(TicketStatus::Refunded),
            other => Err(OrderError::UnknownStatus(other.to_string())),
        }
    }
}

/// One sold cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub order_id: OrderId,
    pub cell_id: CellId,
    pub draw_id: DrawId,
    pub user_id: UserId,
    pub number: i32,
    pub series: i32,
    pub purchase_amount: Money,
    pub transaction_id: String,
    pub status: TicketStatus,
    pub purchased_at: DateTime<Utc>,
}
