//! Shared application state and the background tasks behind it.

use std::sync::Arc;

use gateway::{ReservationGateway, RoomRegistry};
use inventory::NumberInventory;
use ledger::{OrderLedger, OrderStore};
use saga::{
    Consumer, ExpiryScheduler, InMemoryEventBus, InventoryEventHandler, OrderCoordinator,
    OutboxRelay, ReconciliationSweeper, ReservationReconciler,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<I: NumberInventory, S: OrderStore> {
    pub inventory: Arc<I>,
    pub ledger: Arc<OrderLedger<S>>,
    pub coordinator: Arc<OrderCoordinator<S, InMemoryEventBus>>,
    pub gateway: ReservationGateway<I, InMemoryEventBus>,
    pub rooms: RoomRegistry,
    pub bus: InMemoryEventBus,
}

impl<I, S> AppState<I, S>
where
    I: NumberInventory + 'static,
    S: OrderStore + 'static,
{
    /// Wires the inventory and order store together over a fresh bus.
    pub fn new(inventory: Arc<I>, store: S) -> Self {
        let bus = InMemoryEventBus::new();
        let rooms = RoomRegistry::new();
        let ledger = Arc::new(OrderLedger::new(store));
        let coordinator = Arc::new(OrderCoordinator::new(
            ledger.clone(),
            ExpiryScheduler::new(bus.clone()),
        ));
        let gateway = ReservationGateway::new(inventory.clone(), bus.clone(), rooms.clone());

        Self {
            inventory,
            ledger,
            coordinator,
            gateway,
            rooms,
            bus,
        }
    }

    /// Starts the consumers, the outbox relay and the sweeper. They stop
    /// when `shutdown` flips to true.
    ///
    /// Consumers subscribe before this returns, so no event published
    /// afterwards is missed.
    pub fn spawn_workers(&self, config: &Config, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let coordinator = Consumer::new(self.coordinator.clone()).spawn(&self.bus, shutdown.clone());
        let inventory = Consumer::new(Arc::new(InventoryEventHandler::new(
            self.inventory.clone(),
            self.rooms.clone(),
        )))
        .spawn(&self.bus, shutdown.clone());

        let relay = OutboxRelay::new(self.ledger.clone(), self.bus.clone())
            .with_poll_interval(config.outbox_poll_interval)
            .run(shutdown.clone());
        let sweeper = ReconciliationSweeper::new(
            self.ledger.clone(),
            self.coordinator.scheduler().clone(),
            config.sweeper.clone(),
        )
        .run(shutdown.clone());
        let reconciler = ReservationReconciler::new(
            self.inventory.clone(),
            self.ledger.clone(),
            self.rooms.clone(),
            config.sweeper.clone(),
        )
        .run(shutdown);

        vec![
            coordinator,
            inventory,
            tokio::spawn(relay),
            tokio::spawn(sweeper),
            tokio::spawn(reconciler),
        ]
    }
}
