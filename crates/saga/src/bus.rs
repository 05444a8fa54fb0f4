//! Event bus carrying integration events between the two services.

use async_trait::async_trait;
use common::IntegrationEvent;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use gateway::EventPublisher;
use thiserror::Error;
use tokio::sync::broadcast;

/// Default number of events a slow subscriber may fall behind by.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum BusError {
    /// Nobody is subscribed, so the event would be lost.
    #[error("No subscribers for {event_type}")]
    NoSubscribers { event_type: &'static str },
}

/// Publish/subscribe transport for `IntegrationEvent`s.
///
/// Delivery is at least once: publishers retry until `publish` succeeds and
/// handlers must tolerate duplicates.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), BusError>;

    /// Opens a new subscription. Only events published after this call are seen.
    fn subscribe(&self) -> BoxStream<'static, IntegrationEvent>;
}

/// Single-process bus backed by a tokio broadcast channel.
#[derive(Clone)]
pub struct InMemoryEventBus {
    sender: broadcast::Sender<IntegrationEvent>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), BusError> {
        let event_type = event.event_type();
        let order_id = event.order_id();
        self.sender
            .send(event)
            .map_err(|_| BusError::NoSubscribers { event_type })?;
        tracing::debug!(event_type, %order_id, "event published");
        Ok(())
    }

    fn subscribe(&self) -> BoxStream<'static, IntegrationEvent> {
        let receiver = self.sender.subscribe();
        stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => return Some((event, receiver)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        metrics::counter!("bus_events_lagged_total").increment(skipped);
                        tracing::warn!(skipped, "subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: IntegrationEvent) -> Result<(), String> {
        EventBus::publish(self, event)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use common::{DrawId, OrderId, OrderTimeoutData};

    use super::*;

    fn timeout_event() -> IntegrationEvent {
        IntegrationEvent::OrderTimeout(OrderTimeoutData {
            order_id: OrderId::new(),
            draw_id: DrawId::new(),
            cell_ids: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let bus = InMemoryEventBus::new();

        let result = EventBus::publish(&bus, timeout_event()).await;

        assert!(matches!(result, Err(BusError::NoSubscribers { .. })));
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_every_event() {
        let bus = InMemoryEventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let event = timeout_event();

        EventBus::publish(&bus, event.clone()).await.unwrap();

        assert_eq!(first.next().await, Some(event.clone()));
        assert_eq!(second.next().await, Some(event));
    }
}
