//! Choreography between the number inventory and the order ledger.
//!
//! Neither service calls the other. The ledger stages events in its outbox,
//! the relay moves them onto the bus, and each side reacts:
//!
//! - `OrderCoordinator` turns `NumbersReserved` into orders and expires them
//!   on `OrderTimeout`
//! - `InventoryEventHandler` attaches, sells, or releases cells as orders
//!   are created, completed, expired, or cancelled
//! - `ExpiryScheduler` arms one timer per Pending order
//! - `ReconciliationSweeper` expires whatever the timers missed
//! - `ReservationReconciler` releases cells whose release event was lost

pub mod bus;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod inventory_handler;
pub mod reconciler;
pub mod relay;
pub mod scheduler;
pub mod sweeper;

pub use bus::{BusError, DEFAULT_BUS_CAPACITY, EventBus, InMemoryEventBus};
pub use consumer::{Consumer, EventHandler, RetryConfig};
pub use coordinator::OrderCoordinator;
pub use error::{Result, SagaError};
pub use inventory_handler::InventoryEventHandler;
pub use reconciler::{ReconcileReport, ReservationReconciler};
pub use relay::OutboxRelay;
pub use scheduler::ExpiryScheduler;
pub use sweeper::{ReconciliationSweeper, SweepReport, SweeperConfig};
