//! Delivery loop shared by every event consumer.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::IntegrationEvent;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::Result;
use crate::bus::EventBus;

/// Backoff applied when a handler fails.
///
/// Delay for retry `n` (zero-based) is `initial_delay * multiplier^n`,
/// capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_delay)
    }
}

/// Reacts to integration events.
///
/// Handlers see every event on the bus and ignore the ones they do not
/// consume. They must be idempotent: the same event may arrive more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, event: &IntegrationEvent) -> Result<()>;
}

/// Feeds a bus subscription to one handler, one event at a time.
pub struct Consumer<H> {
    handler: Arc<H>,
    retry: RetryConfig,
}

impl<H: EventHandler + 'static> Consumer<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self::with_retry(handler, RetryConfig::default())
    }

    pub fn with_retry(handler: Arc<H>, retry: RetryConfig) -> Self {
        Self { handler, retry }
    }

    /// Subscribes now and processes events on a background task until
    /// `shutdown` flips or the bus closes.
    pub fn spawn<B: EventBus>(self, bus: &B, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let events = bus.subscribe();
        tokio::spawn(self.run(events, shutdown))
    }

    pub async fn run(
        self,
        mut events: BoxStream<'static, IntegrationEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let name = self.handler.name();
        tracing::info!(consumer = name, "consumer started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                next = events.next() => match next {
                    Some(event) => {
                        self.deliver(&event).await;
                    }
                    None => break,
                },
            }
        }
        tracing::info!(consumer = name, "consumer stopped");
    }

    /// Runs the handler with retries. Returns false if the event was dropped.
    pub async fn deliver(&self, event: &IntegrationEvent) -> bool {
        let name = self.handler.name();
        let event_type = event.event_type();
        let order_id = event.order_id();
        let mut attempt = 0;

        loop {
            let error = match self.handler.handle(event).await {
                Ok(()) => return true,
                Err(e) => e,
            };

            if error.is_permanent() {
                tracing::error!(consumer = name, event_type, %order_id, %error, "handler failed permanently, dropping event");
                return false;
            }
            if attempt >= self.retry.max_retries {
                tracing::error!(consumer = name, event_type, %order_id, %error, attempts = attempt + 1, "retries exhausted, dropping event");
                return false;
            }

            let delay = self.retry.delay_for_attempt(attempt);
            metrics::counter!("bus_handler_retries_total", "consumer" => name).increment(1);
            tracing::warn!(consumer = name, event_type, %order_id, %error, ?delay, "handler failed, retrying");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::{DrawId, OrderId, OrderTimeoutData};
    use inventory::InventoryError;

    use super::*;
    use crate::SagaError;

    struct FlakyHandler {
        calls: AtomicUsize,
        failures: usize,
        permanent: bool,
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn handle(&self, _event: &IntegrationEvent) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.failures {
                return Ok(());
            }
            if self.permanent {
                Err(SagaError::Inventory(InventoryError::InvalidDraw("bad".into())))
            } else {
                Err(SagaError::Inventory(InventoryError::ConcurrencyConflict {
                    cell_id: common::CellId::new(),
                }))
            }
        }
    }

    fn handler(failures: usize, permanent: bool) -> Arc<FlakyHandler> {
        Arc::new(FlakyHandler {
            calls: AtomicUsize::new(0),
            failures,
            permanent,
        })
    }

    fn event() -> IntegrationEvent {
        IntegrationEvent::OrderTimeout(OrderTimeoutData {
            order_id: OrderId::new(),
            draw_id: DrawId::new(),
            cell_ids: Vec::new(),
        })
    }

    #[test]
    fn test_delay_grows_and_caps() {
        let retry = RetryConfig::default();

        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried() {
        let handler = handler(2, false);
        let consumer = Consumer::new(handler.clone());

        assert!(consumer.deliver(&event()).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let handler = handler(10, false);
        let consumer = Consumer::new(handler.clone());

        assert!(!consumer.deliver(&event()).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let handler = handler(10, true);
        let consumer = Consumer::new(handler.clone());

        assert!(!consumer.deliver(&event()).await);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
