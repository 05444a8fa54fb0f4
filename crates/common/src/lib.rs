//! Types shared by the inventory and order services.
//!
//! The two services never hold references into each other's data. They
//! correlate through the identifiers defined here, carried inside
//! [`IntegrationEvent`] payloads.

pub mod events;
pub mod types;

pub use events::{
    IntegrationEvent, NumbersReservedData, OrderCancelledData, OrderCompletedData,
    OrderCreatedData, OrderExpiredData, OrderTimeoutData,
};
pub use types::{CellId, ConnectionId, DrawId, Money, OrderId, TicketId, UserId, Version};
