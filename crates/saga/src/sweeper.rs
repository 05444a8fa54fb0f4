//! Periodic reconciliation of overdue Pending orders.
//!
//! Timers are in-memory and can be lost to a restart or a failed publish.
//! The sweeper is the backstop: every interval it expires Pending orders
//! whose expiry passed more than `grace` ago.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use ledger::{ExpiryTrigger, OrderLedger, OrderStore};
use tokio::sync::watch;

use crate::Result;
use crate::bus::EventBus;
use crate::scheduler::ExpiryScheduler;

#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Wait before the first sweep, giving re-armed timers a chance to fire.
    pub initial_delay: Duration,
    pub interval: Duration,
    /// How long past its expiry an order must be before the sweep touches it.
    pub grace: Duration,
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(30),
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(30),
            batch_size: 100,
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub expired: usize,
    pub failed: usize,
}

pub struct ReconciliationSweeper<S: OrderStore, B> {
    ledger: Arc<OrderLedger<S>>,
    scheduler: ExpiryScheduler<B>,
    config: SweeperConfig,
}

impl<S, B> ReconciliationSweeper<S, B>
where
    S: OrderStore,
    B: EventBus + Clone + 'static,
{
    pub fn new(
        ledger: Arc<OrderLedger<S>>,
        scheduler: ExpiryScheduler<B>,
        config: SweeperConfig,
    ) -> Self {
        Self {
            ledger,
            scheduler,
            config,
        }
    }

    /// Expires one batch of overdue orders. A failure on one order is logged
    /// and counted without stopping the rest.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let started = Instant::now();
        metrics::counter!("sweeper_runs_total").increment(1);

        let grace = chrono::Duration::from_std(self.config.grace).unwrap_or(chrono::Duration::zero());
        let cutoff = Utc::now() - grace;
        let overdue = self
            .ledger
            .overdue_pending(cutoff, self.config.batch_size)
            .await?;

        let mut report = SweepReport {
            found: overdue.len(),
            ..SweepReport::default()
        };
        for order in overdue {
            let order_id = order.id();
            match self.ledger.expire_order(order_id, ExpiryTrigger::Sweep).await {
                Ok(transition) => {
                    if transition.applied {
                        report.expired += 1;
                    }
                    self.scheduler.cancel(order_id).await;
                }
                Err(error) => {
                    report.failed += 1;
                    metrics::counter!("sweeper_failures_total").increment(1);
                    tracing::error!(%order_id, %error, "failed to expire overdue order");
                }
            }
        }

        metrics::histogram!("sweeper_duration_seconds").record(started.elapsed().as_secs_f64());
        if report.found > 0 {
            tracing::info!(
                found = report.found,
                expired = report.expired,
                failed = report.failed,
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps on a fixed interval until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            initial_delay = ?self.config.initial_delay,
            interval = ?self.config.interval,
            "reconciliation sweeper started"
        );
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(self.config.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep_once().await {
                        tracing::error!(%error, "sweep failed");
                    }
                }
            }
        }
        tracing::info!("reconciliation sweeper stopped");
    }
}
