//! Push-channel message types.
//!
//! Frames are JSON objects tagged by `type`:
//!
//! ```json
//! {"type": "join", "draw_id": "550e8400-..."}
//! {"type": "reserve", "draw_id": "550e8400-...", "user_id": 7,
//!  "items": [{"number": 12, "quantity": 2}], "existing_order_id": null}
//! ```

use chrono::{DateTime, Utc};
use common::{CellId, DrawId, Money, OrderId, UserId};
use inventory::{NumberAvailability, NumberCell};
use serde::{Deserialize, Serialize};

/// One cart line: `quantity` series of `number`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub number: i32,
    pub quantity: usize,
}

/// A cell as shown to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSummary {
    pub cell_id: CellId,
    pub number: i32,
    pub series: i32,
}

impl From<&NumberCell> for CellSummary {
    fn from(cell: &NumberCell) -> Self {
        Self {
            cell_id: cell.id,
            number: cell.number,
            series: cell.series,
        }
    }
}

/// Sent to the caller after a successful reservation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationConfirmation {
    /// The order the cells are meant for.
    pub order_id: OrderId,
    /// When adding to an existing order, the id the cells are held under
    /// until that order takes them. It becomes a new order of its own if the
    /// existing one can no longer be extended.
    pub fallback_order_id: Option<OrderId>,
    pub draw_id: DrawId,
    pub cells: Vec<CellSummary>,
    pub unit_price: Money,
    pub total_amount: Money,
    pub expires_at: DateTime<Utc>,
    pub seconds_remaining: i64,
}

/// Server → client frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushMessage {
    /// A cell in the room's draw was reserved.
    NumberReserved {
        draw_id: DrawId,
        cell: CellSummary,
    },
    NumbersReleased {
        draw_id: DrawId,
        cells: Vec<CellSummary>,
    },
    NumbersSold {
        draw_id: DrawId,
        cells: Vec<CellSummary>,
    },
    /// Availability snapshot, sent on join and refresh.
    AvailableNumbers {
        draw_id: DrawId,
        numbers: Vec<NumberAvailability>,
        available_count: usize,
    },
    ReservationConfirmed(ReservationConfirmation),
    Error {
        message: String,
    },
}

/// Client → server frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        draw_id: DrawId,
    },
    Leave {
        draw_id: DrawId,
    },
    Refresh {
        draw_id: DrawId,
    },
    Reserve {
        draw_id: DrawId,
        user_id: UserId,
        items: Vec<CartItem>,
        #[serde(default)]
        existing_order_id: Option<OrderId>,
    },
}
