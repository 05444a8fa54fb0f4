//! Integration events exchanged between the inventory and order services.
//!
//! The set of events and their consumers is fixed, so they form one closed
//! enum. Each consumer matches on the variants it cares about and ignores
//! the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{CellId, DrawId, Money, OrderId, TicketId, UserId};

/// Messages carried by the event bus.
///
/// Delivery is at-least-once and may be reordered across services, so every
/// handler must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum IntegrationEvent {
    /// Cells were locked by the reservation gateway.
    NumbersReserved(NumbersReservedData),

    /// The ledger created or extended a pending order.
    OrderCreated(OrderCreatedData),

    /// The order was paid; its cells must be sold.
    OrderCompleted(OrderCompletedData),

    /// The order lapsed; its cells must be released.
    OrderExpired(OrderExpiredData),

    /// The order was cancelled; its cells must be released.
    OrderCancelled(OrderCancelledData),

    /// A scheduled expiry timer fired.
    OrderTimeout(OrderTimeoutData),
}

impl IntegrationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            IntegrationEvent::NumbersReserved(_) => "NumbersReserved",
            IntegrationEvent::OrderCreated(_) => "OrderCreated",
            IntegrationEvent::OrderCompleted(_) => "OrderCompleted",
            IntegrationEvent::OrderExpired(_) => "OrderExpired",
            IntegrationEvent::OrderCancelled(_) => "OrderCancelled",
            IntegrationEvent::OrderTimeout(_) => "OrderTimeout",
        }
    }

    /// The order this event correlates with.
    pub fn order_id(&self) -> OrderId {
        match self {
            IntegrationEvent::NumbersReserved(data) => data.order_id,
            IntegrationEvent::OrderCreated(data) => data.order_id,
            IntegrationEvent::OrderCompleted(data) => data.order_id,
            IntegrationEvent::OrderExpired(data) => data.order_id,
            IntegrationEvent::OrderCancelled(data) => data.order_id,
            IntegrationEvent::OrderTimeout(data) => data.order_id,
        }
    }

    pub fn draw_id(&self) -> DrawId {
        match self {
            IntegrationEvent::NumbersReserved(data) => data.draw_id,
            IntegrationEvent::OrderCreated(data) => data.draw_id,
            IntegrationEvent::OrderCompleted(data) => data.draw_id,
            IntegrationEvent::OrderExpired(data) => data.draw_id,
            IntegrationEvent::OrderCancelled(data) => data.draw_id,
            IntegrationEvent::OrderTimeout(data) => data.draw_id,
        }
    }
}

/// Data for NumbersReserved.
///
/// `numbers[i]` and `series[i]` describe `cell_ids[i]`. The cells are always
/// reserved under `order_id`. When `is_add_to_existing` is set they are meant
/// for `existing_order_id`, and `order_id` becomes a new order only if that
/// order can no longer be extended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumbersReservedData {
    pub order_id: OrderId,
    pub draw_id: DrawId,
    pub user_id: UserId,
    pub cell_ids: Vec<CellId>,
    pub numbers: Vec<i32>,
    pub series: Vec<i32>,
    pub unit_price: Money,
    pub total_amount: Money,
    pub expires_at: DateTime<Utc>,
    pub is_add_to_existing: bool,
    pub existing_order_id: Option<OrderId>,
}

/// Data for OrderCreated. Also emitted when cells are added to an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreatedData {
    pub order_id: OrderId,
    pub draw_id: DrawId,
    pub user_id: UserId,
    pub cell_ids: Vec<CellId>,
    pub expires_at: DateTime<Utc>,
    /// Reservation id the added cells are still held under. Set only when
    /// cells are added to an existing order.
    #[serde(default)]
    pub reserved_under: Option<OrderId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCompletedData {
    pub order_id: OrderId,
    /// First ticket issued for the order.
    pub ticket_id: TicketId,
    pub draw_id: DrawId,
    pub user_id: UserId,
    pub cell_ids: Vec<CellId>,
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderExpiredData {
    pub order_id: OrderId,
    pub draw_id: DrawId,
    pub cell_ids: Vec<CellId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelledData {
    pub order_id: OrderId,
    pub draw_id: DrawId,
    pub user_id: UserId,
    pub cell_ids: Vec<CellId>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTimeoutData {
    pub order_id: OrderId,
    pub draw_id: DrawId,
    pub cell_ids: Vec<CellId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = IntegrationEvent::OrderExpired(OrderExpiredData {
            order_id: OrderId::new(),
            draw_id: DrawId::new(),
            cell_ids: vec![CellId::new()],
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "OrderExpired");
        assert_eq!(json["data"]["cell_ids"].as_array().unwrap().len(), 1);

        let back: IntegrationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn accessors_expose_correlation_ids() {
        let order_id = OrderId::new();
        let draw_id = DrawId::new();
        let event = IntegrationEvent::OrderTimeout(OrderTimeoutData {
            order_id,
            draw_id,
            cell_ids: Vec::new(),
        });

        assert_eq!(event.order_id(), order_id);
        assert_eq!(event.draw_id(), draw_id);
        assert_eq!(event.event_type(), "OrderTimeout");
    }
}
