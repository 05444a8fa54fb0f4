//! Commands accepted by the ledger.

use chrono::{DateTime, Duration, Utc};
use common::{DrawId, Money, OrderId, UserId};

use super::OrderLine;

/// Open a Pending order for freshly reserved cells.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub draw_id: DrawId,
    pub lines: Vec<OrderLine>,
    pub total_amount: Money,
    pub expires_at: DateTime<Utc>,
}

impl CreateOrder {
    pub fn new(
        order_id: OrderId,
        user_id: UserId,
        draw_id: DrawId,
        lines: Vec<OrderLine>,
        total_amount: Money,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            user_id,
            draw_id,
            lines,
            total_amount,
            expires_at,
        }
    }

    /// Creates the command with an expiry `ttl` from now.
    pub fn with_ttl(
        order_id: OrderId,
        user_id: UserId,
        draw_id: DrawId,
        lines: Vec<OrderLine>,
        total_amount: Money,
        ttl: Duration,
    ) -> Self {
        Self::new(order_id, user_id, draw_id, lines, total_amount, Utc::now() + ttl)
    }
}

/// Add cells to a live Pending order.
#[derive(Debug, Clone)]
pub struct ExtendOrder {
    pub order_id: OrderId,
    pub lines: Vec<OrderLine>,
    pub additional_amount: Money,
    pub expires_at: DateTime<Utc>,
    /// Reservation id the new cells are held under in the inventory.
    pub reserved_under: Option<OrderId>,
}

impl ExtendOrder {
    pub fn new(
        order_id: OrderId,
        lines: Vec<OrderLine>,
        additional_amount: Money,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            lines,
            additional_amount,
            expires_at,
            reserved_under: None,
        }
    }

    /// Names the reservation the new cells are held under, so the inventory
    /// can hand them over to this order.
    pub fn reserved_under(mut self, reservation_id: OrderId) -> Self {
        self.reserved_under = Some(reservation_id);
        self
    }
}
