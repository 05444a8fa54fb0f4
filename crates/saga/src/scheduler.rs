//! Per-order expiry timers.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use common::{IntegrationEvent, OrderId, OrderTimeoutData};
use ledger::{Order, OrderStatus};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bus::EventBus;

struct Timer {
    handle: JoinHandle<()>,
    generation: u64,
}

/// Arms one timer per Pending order and publishes `OrderTimeout` when it
/// fires.
///
/// Timers live in process memory only. After a restart they are re-armed
/// from the ledger with `rearm`, and anything missed in between is caught by
/// the reconciliation sweep.
#[derive(Clone)]
pub struct ExpiryScheduler<B> {
    bus: B,
    timers: Arc<Mutex<HashMap<OrderId, Timer>>>,
    generations: Arc<AtomicU64>,
}

impl<B: EventBus + Clone + 'static> ExpiryScheduler<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            timers: Arc::default(),
            generations: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Arms a timer for `order`, replacing any timer it already has.
    ///
    /// An order already past its expiry fires immediately. Orders that are
    /// not Pending are ignored.
    pub async fn schedule(&self, order: &Order) {
        if order.status() != OrderStatus::Pending {
            tracing::debug!(order_id = %order.id(), status = %order.status(), "not pending, no timer armed");
            return;
        }

        let order_id = order.id();
        let delay = (order.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let event = IntegrationEvent::OrderTimeout(OrderTimeoutData {
            order_id,
            draw_id: order.draw_id(),
            cell_ids: order.cell_ids(),
        });
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);

        let mut timers = self.timers.lock().await;
        let handle = tokio::spawn(self.clone().fire(order_id, generation, delay, event));
        if let Some(previous) = timers.insert(order_id, Timer { handle, generation }) {
            previous.handle.abort();
        }
        metrics::gauge!("expiry_timers_armed").set(timers.len() as f64);
        tracing::debug!(%order_id, ?delay, "expiry timer armed");
    }

    /// Disarms the timer for `order_id`. Returns false if none was armed.
    pub async fn cancel(&self, order_id: OrderId) -> bool {
        let mut timers = self.timers.lock().await;
        let Some(timer) = timers.remove(&order_id) else {
            return false;
        };
        timer.handle.abort();
        metrics::gauge!("expiry_timers_armed").set(timers.len() as f64);
        tracing::debug!(%order_id, "expiry timer cancelled");
        true
    }

    /// Arms timers for every Pending order in `orders`. Returns how many were armed.
    pub async fn rearm(&self, orders: &[Order]) -> usize {
        let mut armed = 0;
        for order in orders.iter().filter(|o| o.status() == OrderStatus::Pending) {
            self.schedule(order).await;
            armed += 1;
        }
        tracing::info!(armed, "expiry timers re-armed");
        armed
    }

    pub async fn armed_count(&self) -> usize {
        self.timers.lock().await.len()
    }

    async fn fire(self, order_id: OrderId, generation: u64, delay: Duration, event: IntegrationEvent) {
        tokio::time::sleep(delay).await;

        match self.bus.publish(event).await {
            Ok(()) => {
                metrics::counter!("expiry_timers_fired_total").increment(1);
                tracing::info!(%order_id, "expiry timer fired");
            }
            Err(error) => {
                tracing::warn!(%order_id, %error, "could not publish order timeout, leaving it to the sweep");
            }
        }

        let mut timers = self.timers.lock().await;
        if timers
            .get(&order_id)
            .is_some_and(|t| t.generation == generation)
        {
            timers.remove(&order_id);
            metrics::gauge!("expiry_timers_armed").set(timers.len() as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use common::{CellId, DrawId, Money, UserId};
    use futures_util::StreamExt;
    use ledger::{CreateOrder, OrderLine};

    use super::*;
    use crate::InMemoryEventBus;

    fn pending_order(ttl: ChronoDuration) -> Order {
        let (order, _) = Order::create(CreateOrder::with_ttl(
            OrderId::new(),
            UserId::new(1),
            DrawId::new(),
            vec![OrderLine {
                cell_id: CellId::new(),
                number: 3,
                series: 1,
            }],
            Money::from_cents(100),
            ttl,
        ))
        .unwrap();
        order
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_publishes_order_timeout() {
        let bus = InMemoryEventBus::new();
        let mut events = bus.subscribe();
        let scheduler = ExpiryScheduler::new(bus.clone());
        let order = pending_order(ChronoDuration::seconds(60));

        scheduler.schedule(&order).await;
        assert_eq!(scheduler.armed_count().await, 1);

        let event = tokio::time::timeout(Duration::from_secs(120), events.next())
            .await
            .unwrap()
            .unwrap();
        match event {
            IntegrationEvent::OrderTimeout(data) => {
                assert_eq!(data.order_id, order.id());
                assert_eq!(data.cell_ids, order.cell_ids());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overdue_order_fires_immediately() {
        let bus = InMemoryEventBus::new();
        let mut events = bus.subscribe();
        let scheduler = ExpiryScheduler::new(bus.clone());
        let order = pending_order(ChronoDuration::seconds(-5));

        scheduler.schedule(&order).await;

        let event = tokio::time::timeout(Duration::from_millis(10), events.next()).await;
        assert!(matches!(event, Ok(Some(IntegrationEvent::OrderTimeout(_)))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let bus = InMemoryEventBus::new();
        let mut events = bus.subscribe();
        let scheduler = ExpiryScheduler::new(bus.clone());
        let order = pending_order(ChronoDuration::seconds(30));

        scheduler.schedule(&order).await;
        assert!(scheduler.cancel(order.id()).await);
        assert!(!scheduler.cancel(order.id()).await);

        let event = tokio::time::timeout(Duration::from_secs(120), events.next()).await;
        assert!(event.is_err());
        assert_eq!(scheduler.armed_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescheduling_replaces_timer() {
        let bus = InMemoryEventBus::new();
        let mut events = bus.subscribe();
        let scheduler = ExpiryScheduler::new(bus.clone());
        let order = pending_order(ChronoDuration::seconds(30));

        scheduler.schedule(&order).await;
        scheduler.schedule(&order).await;
        assert_eq!(scheduler.armed_count().await, 1);

        let first = tokio::time::timeout(Duration::from_secs(60), events.next()).await;
        assert!(first.is_ok());
        let second = tokio::time::timeout(Duration::from_secs(60), events.next()).await;
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_skips_terminal_orders() {
        let scheduler = ExpiryScheduler::new(InMemoryEventBus::new());
        let pending = pending_order(ChronoDuration::seconds(30));
        let mut expired = pending_order(ChronoDuration::seconds(30));
        expired.expire(Utc::now()).unwrap();

        let armed = scheduler.rearm(&[pending, expired]).await;

        assert_eq!(armed, 1);
        assert_eq!(scheduler.armed_count().await, 1);
    }
}
