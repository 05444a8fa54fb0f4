//! Order persistence with a transactional outbox.

mod memory;
mod postgres;

pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{IntegrationEvent, OrderId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Order, Result, Ticket};

/// An integration event staged alongside an order write.
///
/// Rows are published by the outbox relay after the write commits and are
/// delivered at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: Uuid,
    pub event: IntegrationEvent,
    pub created_at: DateTime<Utc>,
}

impl OutboxMessage {
    pub fn new(event: IntegrationEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            created_at: Utc::now(),
        }
    }
}

/// Storage for orders, their tickets, and the outbox.
///
/// Every write method commits the order row, any tickets, and the staged
/// outbox messages in a single transaction.
#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Inserts a new order. Returns `false` without writing anything if an
    /// order with the same id already exists.
    async fn insert(&self, order: &Order, outbox: Vec<OutboxMessage>) -> Result<bool>;

    /// Overwrites the order if its stored version still equals `expected`.
    ///
    /// Fails with `ConcurrencyConflict` when another writer got there first.
    async fn update(
        &self,
        order: &Order,
        expected: Version,
        tickets: &[Ticket],
        outbox: Vec<OutboxMessage>,
    ) -> Result<()>;

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>>;

    /// Pending orders whose expiry is strictly before `cutoff`, oldest first.
    async fn find_overdue_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>>;

    /// Every Pending order, soonest expiry first.
    async fn pending_orders(&self) -> Result<Vec<Order>>;

    /// Staged messages not yet published, in staging order.
    async fn undispatched_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>>;

    async fn mark_dispatched(&self, ids: &[Uuid]) -> Result<()>;
}
