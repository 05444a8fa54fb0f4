pub mod cell;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use cell::{CellStatus, Draw, DrawConfig, NumberAvailability, NumberCell};
pub use common::{CellId, DrawId, OrderId, TicketId, Version};
pub use error::{InventoryError, Result};
pub use memory::InMemoryNumberInventory;
pub use postgres::PostgresNumberInventory;
pub use store::{
    DEFAULT_RESERVATION_TTL_SECS, MAX_QUANTITY_PER_REQUEST, NumberInventory, NumberInventoryExt,
};
