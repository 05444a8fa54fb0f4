//! Real-time reservation gateway.
//!
//! Clients connect over a push channel, join draw rooms to follow
//! availability, and reserve carts of numbers. The gateway talks to the
//! inventory directly and to the order side only through published events.

pub mod error;
pub mod gateway;
pub mod messages;
pub mod rooms;

pub use error::{GENERIC_ERROR_MESSAGE, GatewayError, Result};
pub use gateway::{EventPublisher, Reservation, ReservationGateway};
pub use messages::{CartItem, CellSummary, ClientFrame, PushMessage, ReservationConfirmation};
pub use rooms::{DrawNotifier, RoomRegistry};
