//! Outbox relay: moves staged ledger events onto the bus.

use std::sync::Arc;
use std::time::Duration;

use ledger::{OrderLedger, OrderStore};
use tokio::sync::watch;
use uuid::Uuid;

use crate::Result;
use crate::bus::EventBus;

/// Publishes undispatched outbox messages in staging order.
///
/// A message is marked dispatched only after the bus accepted it, so a crash
/// between the two republishes it. Consumers deduplicate.
pub struct OutboxRelay<S: OrderStore, B> {
    ledger: Arc<OrderLedger<S>>,
    bus: B,
    batch_size: usize,
    poll_interval: Duration,
}

impl<S, B> OutboxRelay<S, B>
where
    S: OrderStore,
    B: EventBus,
{
    pub fn new(ledger: Arc<OrderLedger<S>>, bus: B) -> Self {
        Self {
            ledger,
            bus,
            batch_size: 100,
            poll_interval: Duration::from_millis(50),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Publishes one batch. Stops at the first publish failure so ordering is
    /// kept; the rest go out on the next pass. Returns how many were published.
    pub async fn relay_once(&self) -> Result<usize> {
        let pending = self.ledger.undispatched_outbox(self.batch_size).await?;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut published: Vec<Uuid> = Vec::with_capacity(pending.len());
        for message in pending {
            let event_type = message.event.event_type();
            match self.bus.publish(message.event).await {
                Ok(()) => published.push(message.id),
                Err(error) => {
                    tracing::warn!(event_type, %error, "outbox publish failed, will retry");
                    break;
                }
            }
        }

        if !published.is_empty() {
            self.ledger.mark_dispatched(&published).await?;
            metrics::counter!("outbox_dispatched_total").increment(published.len() as u64);
            tracing::debug!(count = published.len(), "outbox messages dispatched");
        }
        Ok(published.len())
    }

    /// Polls the outbox until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(poll_interval = ?self.poll_interval, "outbox relay started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.relay_once().await {
                        tracing::error!(%error, "outbox relay pass failed");
                    }
                }
            }
        }
        tracing::info!("outbox relay stopped");
    }
}
