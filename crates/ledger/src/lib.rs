//! Order ledger for the lottery order service.
//!
//! This crate owns the order and ticket lifecycle:
//! - `Order` with its Pending → Completed/Expired/Cancelled state machine
//! - `Ticket` issuance on completion
//! - `OrderStore` persistence with a transactional outbox, so every staged
//!   integration event commits atomically with the order write
//! - `OrderLedger`, the idempotent service entry points

pub mod error;
pub mod order;
pub mod service;
pub mod store;

pub use error::{LedgerError, Result};
pub use order::{
    CreateOrder, ExtendOrder, Order, OrderError, OrderLine, OrderStatus, Ticket, TicketStatus,
};
pub use service::{Completion, Creation, ExpiryTrigger, OrderLedger, Transition};
pub use store::{InMemoryOrderStore, OrderStore, OutboxMessage, PostgresOrderStore};
