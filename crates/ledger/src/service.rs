//! Order ledger service: the entry points every caller goes through.

use chrono::{DateTime, Utc};
use common::{IntegrationEvent, OrderId, Version};
use uuid::Uuid;

use crate::store::{OrderStore, OutboxMessage};
use crate::{CreateOrder, ExtendOrder, LedgerError, Order, OrderError, Result, Ticket};

/// Attempts at a version-guarded write before giving up on a hot order.
const MAX_CONFLICT_RETRIES: usize = 3;

/// What caused an expiry, used to label metrics and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryTrigger {
    /// The per-order timer fired.
    Timer,
    /// The reconciliation sweep found the order overdue.
    Sweep,
    /// A completion attempt arrived after the payment window.
    Completion,
}

impl ExpiryTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryTrigger::Timer => "timer",
            ExpiryTrigger::Sweep => "sweep",
            ExpiryTrigger::Completion => "completion",
        }
    }
}

/// Result of `create_order`.
#[derive(Debug, Clone)]
pub struct Creation {
    pub order: Order,
    /// False when the order already existed and was returned unchanged.
    pub created: bool,
}

/// Result of `complete_order`.
#[derive(Debug, Clone)]
pub struct Completion {
    pub order: Order,
    pub tickets: Vec<Ticket>,
    /// False when the order was already terminal.
    pub applied: bool,
}

/// Result of `expire_order` and `cancel_order`.
#[derive(Debug, Clone)]
pub struct Transition {
    pub order: Order,
    /// False when the order was already terminal.
    pub applied: bool,
}

/// The order owner.
///
/// Every operation is safe to repeat. Terminal transitions are guarded by
/// the order's version token, so when two of them race exactly one commits
/// and the other reloads, observes the terminal status, and returns a no-op.
#[derive(Clone)]
pub struct OrderLedger<S: OrderStore> {
    store: S,
}

impl<S: OrderStore> OrderLedger<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Opens a Pending order, or returns the existing one for a repeated id.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn create_order(&self, cmd: CreateOrder) -> Result<Creation> {
        let order_id = cmd.order_id;
        let (order, event) = Order::create(cmd)?;

        if self
            .store
            .insert(&order, vec![OutboxMessage::new(event)])
            .await?
        {
            metrics::counter!("orders_created_total").increment(1);
            tracing::info!(
                draw_id = %order.draw_id(),
                cells = order.lines().len(),
                expires_at = %order.expires_at(),
                "order created"
            );
            return Ok(Creation {
                order,
                created: true,
            });
        }

        let existing = self.load(order_id).await?;
        tracing::info!(status = %existing.status(), "order already exists, returning it unchanged");
        Ok(Creation {
            order: existing,
            created: false,
        })
    }

    /// Adds cells to a live Pending order.
    ///
    /// Fails with `NotExtendable` when the order is terminal or past its
    /// expiry; the caller then opens a new order instead.
    #[tracing::instrument(skip(self, cmd), fields(order_id = %cmd.order_id))]
    pub async fn extend_order(&self, cmd: ExtendOrder) -> Result<Order> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut order = self.load(cmd.order_id).await?;
            let expected = order.version();
            let event = order.extend(cmd.clone(), Utc::now())?;

            if self.commit(&mut order, expected, &[], vec![event]).await? {
                tracing::info!(
                    cells = order.lines().len(),
                    expires_at = %order.expires_at(),
                    "order extended"
                );
                return Ok(order);
            }
        }
        Err(self.exhausted(cmd.order_id).await)
    }

    /// Completes a Pending order and issues its tickets.
    ///
    /// An order that is already terminal is returned as-is with its existing
    /// tickets (none unless it was Completed). A Pending order whose expiry has
    /// passed is expired instead and the call fails with `OrderError::Expired`.
    #[tracing::instrument(skip(self))]
    pub async fn complete_order(&self, order_id: OrderId, transaction_id: &str) -> Result<Completion> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut order = self.load(order_id).await?;
            if order.status().is_terminal() {
                tracing::info!(status = %order.status(), "order already terminal, completion is a no-op");
                let tickets = self.store.tickets_for_order(order_id).await?;
                return Ok(Completion {
                    order,
                    tickets,
                    applied: false,
                });
            }

            let now = Utc::now();
            let expected = order.version();

            if order.is_expired_at(now) {
                let event = order.expire(now)?;
                if self.commit(&mut order, expected, &[], vec![event]).await? {
                    Self::record_expiry(ExpiryTrigger::Completion);
                    tracing::warn!("completion arrived after expiry, order expired");
                    return Err(OrderError::Expired.into());
                }
                continue;
            }

            let (tickets, event) = order.complete(transaction_id, now)?;
            if self.commit(&mut order, expected, &tickets, vec![event]).await? {
                metrics::counter!("orders_completed_total").increment(1);
                tracing::info!(
                    transaction_id,
                    tickets = tickets.len(),
                    "order completed"
                );
                return Ok(Completion {
                    order,
                    tickets,
                    applied: true,
                });
            }
        }
        Err(self.exhausted(order_id).await)
    }

    /// Expires a Pending order. A terminal order is left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn expire_order(&self, order_id: OrderId, trigger: ExpiryTrigger) -> Result<Transition> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut order = self.load(order_id).await?;
            if order.status().is_terminal() {
                tracing::info!(status = %order.status(), "order already terminal, expiry is a no-op");
                return Ok(Transition {
                    order,
                    applied: false,
                });
            }

            let expected = order.version();
            let event = order.expire(Utc::now())?;
            if self.commit(&mut order, expected, &[], vec![event]).await? {
                Self::record_expiry(trigger);
                tracing::info!(trigger = trigger.as_str(), "order expired");
                return Ok(Transition {
                    order,
                    applied: true,
                });
            }
        }
        Err(self.exhausted(order_id).await)
    }

    /// Cancels a Pending order. A terminal order is left untouched.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> Result<Transition> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut order = self.load(order_id).await?;
            if order.status().is_terminal() {
                tracing::info!(status = %order.status(), "order already terminal, cancellation is a no-op");
                return Ok(Transition {
                    order,
                    applied: false,
                });
            }

            let expected = order.version();
            let event = order.cancel(reason, Utc::now())?;
            if self.commit(&mut order, expected, &[], vec![event]).await? {
                metrics::counter!("orders_cancelled_total").increment(1);
                tracing::info!(reason, "order cancelled");
                return Ok(Transition {
                    order,
                    applied: true,
                });
            }
        }
        Err(self.exhausted(order_id).await)
    }

    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.store.get(order_id).await
    }

    pub async fn tickets(&self, order_id: OrderId) -> Result<Vec<Ticket>> {
        self.store.tickets_for_order(order_id).await
    }

    /// Pending orders whose expiry is strictly before `cutoff`.
    pub async fn overdue_pending(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
        self.store.find_overdue_pending(cutoff, limit).await
    }

    pub async fn pending_orders(&self) -> Result<Vec<Order>> {
        self.store.pending_orders().await
    }

    pub async fn undispatched_outbox(&self, limit: usize) -> Result<Vec<OutboxMessage>> {
        self.store.undispatched_outbox(limit).await
    }

    pub async fn mark_dispatched(&self, ids: &[Uuid]) -> Result<()> {
        self.store.mark_dispatched(ids).await
    }

    async fn load(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or(LedgerError::OrderNotFound(order_id))
    }

    /// Writes the mutated order with its staged events. Returns false if
    /// another writer committed since `expected` was read.
    async fn commit(
        &self,
        order: &mut Order,
        expected: Version,
        tickets: &[Ticket],
        events: Vec<IntegrationEvent>,
    ) -> Result<bool> {
        order.bump_version();
        let outbox = events.into_iter().map(OutboxMessage::new).collect();

        match self.store.update(order, expected, tickets, outbox).await {
            Ok(()) => Ok(true),
            Err(LedgerError::ConcurrencyConflict { .. }) => {
                metrics::counter!("order_transition_conflicts_total").increment(1);
                tracing::debug!(order_id = %order.id(), %expected, "lost write race, reloading");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn exhausted(&self, order_id: OrderId) -> LedgerError {
        let expected = match self.store.get(order_id).await {
            Ok(Some(order)) => order.version(),
            _ => Version::initial(),
        };
        tracing::warn!(%order_id, "giving up after repeated write conflicts");
        LedgerError::ConcurrencyConflict { order_id, expected }
    }

    fn record_expiry(trigger: ExpiryTrigger) {
        metrics::counter!("orders_expired_total", "trigger" => trigger.as_str()).increment(1);
    }
}
