use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, Version};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{OrderStore, OutboxMessage};
use crate::{LedgerError, Order, OrderStatus, Result, Ticket};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    tickets: HashMap<OrderId, Vec<Ticket>>,
    outbox: Vec<OutboxMessage>,
}

/// In-memory order store for tests and single-process deployments.
///
/// A single lock covers orders, tickets, and the outbox so each write is
/// atomic the same way a database transaction is.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Staged messages not yet dispatched. Dispatched ones are dropped.
    pub async fn outbox(&self) -> Vec<OutboxMessage> {
        self.state.read().await.outbox.clone()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn insert(&self, order: &Order, outbox: Vec<OutboxMessage>) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.id()) {
            return Ok(false);
        }
        state.orders.insert(order.id(), order.clone());
        state.outbox.extend(outbox);
        Ok(true)
    }

    async fn update(
        &self,
        order: &Order,
        expected: Version,
        tickets: &[Ticket],
        outbox: Vec<OutboxMessage>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let stored = state
            .orders
            .get(&order.id())
            .ok_or(LedgerError::OrderNotFound(order.id()))?;
        if stored.version() != expected {
            return Err(LedgerError::ConcurrencyConflict {
                order_id: order.id(),
                expected,
            });
        }

        state.orders.insert(order.id(), order.clone());
        if !tickets.is_empty() {
            state
                .tickets
                .entry(order.id())
                .or_default()
                .extend(tickets.iter().cloned());
        }
        state.outbox.extend(outbox);
        Ok(())
    }

    async fn tickets_for_order(&self, order_id: OrderId) -> Result<Vec<Ticket>> {
        Ok(self
            .state
            .read()
            .await
            .tickets
            .get(&order_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_overdue_pending(
        &self,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>> {
        let mut overdue: Vec<Order> = self
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.status() == OrderStatus::Pending && o.expires_at() < cutoff)
            .cloned()
            .collect();
        overdue.sort_by_key(|o| o.expires_at());
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn pending_orders(&self) -> Result<Vec<Order>> {
        let mut pending: Vec<Order> = self
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.status() == OrderStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|o| o.expires_at());
        Ok(pending)
    }

    async fn undispatched_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_dispatched(&self, ids: &[Uuid]) -> Result<()> {
        self.state
            .write()
            .await
            .outbox
            .retain(|message| !ids.contains(&message.id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use common::{CellId, DrawId, Money, UserId};

    use super::*;
    use crate::{CreateOrder, OrderLine};

    fn new_order(ttl: Duration) -> (Order, OutboxMessage) {
        let cmd = CreateOrder::with_ttl(
            OrderId::new(),
            UserId::new(1),
            DrawId::new(),
            vec![OrderLine {
                cell_id: CellId::new(),
                number: 12,
                series: 1,
            }],
            Money::from_cents(500),
            ttl,
        );
        let (order, event) = Order::create(cmd).unwrap();
        (order, OutboxMessage::new(event))
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = InMemoryOrderStore::new();
        let (order, message) = new_order(Duration::minutes(5));

        assert!(store.insert(&order, vec![message.clone()]).await.unwrap());
        assert!(!store.insert(&order, vec![message]).await.unwrap());
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.outbox().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = InMemoryOrderStore::new();
        let (mut order, message) = new_order(Duration::minutes(5));
        store.insert(&order, vec![message]).await.unwrap();

        let expected = order.version();
        order.bump_version();
        store.update(&order, expected, &[], Vec::new()).await.unwrap();

        let result = store.update(&order, expected, &[], Vec::new()).await;
        assert!(matches!(
            result,
            Err(LedgerError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_overdue_pending_is_sorted_and_limited() {
        let store = InMemoryOrderStore::new();
        for minutes in [-3, -1, -2, 5] {
            let (order, message) = new_order(Duration::minutes(minutes));
            store.insert(&order, vec![message]).await.unwrap();
        }

        let overdue = store.find_overdue_pending(Utc::now(), 2).await.unwrap();

        assert_eq!(overdue.len(), 2);
        assert!(overdue[0].expires_at() < overdue[1].expires_at());
        assert_eq!(store.pending_orders().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_mark_dispatched_hides_messages() {
        let store = InMemoryOrderStore::new();
        let (order, message) = new_order(Duration::minutes(5));
        let id = message.id;
        store.insert(&order, vec![message]).await.unwrap();

        assert_eq!(store.undispatched_outbox(10).await.unwrap().len(), 1);
        store.mark_dispatched(&[id]).await.unwrap();
        assert!(store.undispatched_outbox(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatched_messages_are_not_retained() {
        let store = InMemoryOrderStore::new();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let (order, message) = new_order(Duration::minutes(5));
            ids.push(message.id);
            store.insert(&order, vec![message]).await.unwrap();
        }

        store.mark_dispatched(&ids[..2]).await.unwrap();
        store.mark_dispatched(&ids[..2]).await.unwrap();

        let left: Vec<Uuid> = store.outbox().await.iter().map(|m| m.id).collect();
        assert_eq!(left, vec![ids[2]]);
    }

    #[tokio::test]
    async fn test_order_expiring_at_cutoff_is_not_overdue() {
        let store = InMemoryOrderStore::new();
        let (order, message) = new_order(Duration::minutes(-1));
        store.insert(&order, vec![message]).await.unwrap();

        let at_expiry = store
            .find_overdue_pending(order.expires_at(), 10)
            .await
            .unwrap();
        let after_expiry = store
            .find_overdue_pending(order.expires_at() + Duration::milliseconds(1), 10)
            .await
            .unwrap();

        assert!(at_expiry.is_empty());
        assert_eq!(after_expiry.len(), 1);
    }
}
