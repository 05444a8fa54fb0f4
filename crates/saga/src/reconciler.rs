//! Inventory-side backstop for lost order events.
//!
//! A `NumbersReserved`, `OrderExpired` or `OrderCancelled` that never reaches
//! the inventory (a lagged subscriber, a dropped retry) leaves cells Reserved
//! with nobody left to release them. Every interval the reconciler looks at
//! reservations that lapsed more than `grace` ago and settles them against
//! the ledger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::OrderId;
use gateway::DrawNotifier;
use inventory::{NumberCell, NumberInventory};
use ledger::{OrderLedger, OrderStatus, OrderStore};
use tokio::sync::watch;

use crate::Result;
use crate::sweeper::SweeperConfig;

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Lapsed Reserved cells seen.
    pub found: usize,
    pub released: usize,
    pub sold: usize,
    /// Holders whose cells could not be settled.
    pub failed: usize,
}

enum Settlement {
    Released(usize),
    Sold(usize),
    Skipped,
}

pub struct ReservationReconciler<I, S: OrderStore, N> {
    inventory: Arc<I>,
    ledger: Arc<OrderLedger<S>>,
    notifier: N,
    config: SweeperConfig,
}

impl<I, S, N> ReservationReconciler<I, S, N>
where
    I: NumberInventory,
    S: OrderStore,
    N: DrawNotifier,
{
    pub fn new(inventory: Arc<I>, ledger: Arc<OrderLedger<S>>, notifier: N, config: SweeperConfig) -> Self {
        Self {
            inventory,
            ledger,
            notifier,
            config,
        }
    }

    /// Settles one batch of lapsed reservations, grouped by holding order:
    ///
    /// | ledger state of holder   | action            |
    /// |--------------------------|-------------------|
    /// | unknown                  | release           |
    /// | Expired / Cancelled      | release           |
    /// | Completed                | confirm the sale  |
    /// | Pending                  | leave to sweeper  |
    #[tracing::instrument(skip(self))]
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let started = Instant::now();
        metrics::counter!("reservation_reconcile_runs_total").increment(1);

        let grace = chrono::Duration::from_std(self.config.grace).unwrap_or(chrono::Duration::zero());
        let cutoff = Utc::now() - grace;
        let lapsed = self
            .inventory
            .lapsed_reservations(cutoff, self.config.batch_size)
            .await?;

        let mut report = ReconcileReport {
            found: lapsed.len(),
            ..ReconcileReport::default()
        };
        let mut by_holder: HashMap<OrderId, Vec<NumberCell>> = HashMap::new();
        for cell in lapsed {
            if let Some(holder) = cell.reserving_order_id {
                by_holder.entry(holder).or_default().push(cell);
            }
        }

        for (holder, cells) in by_holder {
            match self.settle(holder, &cells).await {
                Ok(Settlement::Released(n)) => report.released += n,
                Ok(Settlement::Sold(n)) => report.sold += n,
                Ok(Settlement::Skipped) => {}
                Err(error) => {
                    report.failed += 1;
                    metrics::counter!("reservation_reconcile_failures_total").increment(1);
                    tracing::error!(order_id = %holder, %error, "failed to settle lapsed reservation");
                }
            }
        }

        metrics::counter!("reservation_reconcile_released_total").increment(report.released as u64);
        metrics::histogram!("reservation_reconcile_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        if report.released > 0 || report.sold > 0 || report.failed > 0 {
            tracing::warn!(
                found = report.found,
                released = report.released,
                sold = report.sold,
                failed = report.failed,
                "settled reservations missed by event handling"
            );
        }
        Ok(report)
    }

    async fn settle(&self, holder: OrderId, cells: &[NumberCell]) -> Result<Settlement> {
        let order = self.ledger.get_order(holder).await?;
        let status = order.as_ref().map(|o| o.status());
        match (status, order.as_ref().and_then(|o| o.ticket_id())) {
            (Some(OrderStatus::Pending), _) => Ok(Settlement::Skipped),
            (Some(OrderStatus::Completed), Some(ticket_id)) => {
                let cell_ids: Vec<_> = cells.iter().map(|c| c.id).collect();
                let sold = self.inventory.confirm_sold(&cell_ids, holder, ticket_id).await?;
                if let Some(cell) = sold.first() {
                    self.notifier.numbers_sold(cell.draw_id, &sold).await;
                }
                Ok(Settlement::Sold(sold.len()))
            }
            (Some(OrderStatus::Completed), None) => {
                tracing::error!(order_id = %holder, "completed order has no ticket");
                Ok(Settlement::Skipped)
            }
            _ => {
                let released = self.inventory.release_by_order(holder).await?;
                if let Some(cell) = released.first() {
                    self.notifier.numbers_released(cell.draw_id, &released).await;
                }
                tracing::info!(order_id = %holder, ?status, count = released.len(), "released lapsed reservation");
                Ok(Settlement::Released(released.len()))
            }
        }
    }

    /// Reconciles on the sweeper's schedule until `shutdown` flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.config.interval, "reservation reconciler started");
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tokio::time::sleep(self.config.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    if let Err(error) = self.reconcile_once().await {
                        tracing::error!(%error, "reservation reconciliation failed");
                    }
                }
            }
        }
        tracing::info!("reservation reconciler stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use common::{CellId, DrawId, Money, UserId};
    use inventory::{CellStatus, DrawConfig, InMemoryNumberInventory};
    use ledger::{CreateOrder, InMemoryOrderStore, OrderLine};

    use super::*;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        released: Arc<Mutex<Vec<CellId>>>,
    }

    #[async_trait]
    impl DrawNotifier for RecordingNotifier {
        async fn numbers_released(&self, _draw_id: DrawId, cells: &[NumberCell]) {
            self.released.lock().unwrap().extend(cells.iter().map(|c| c.id));
        }

        async fn numbers_sold(&self, _draw_id: DrawId, _cells: &[NumberCell]) {}
    }

    struct Fixture {
        inventory: Arc<InMemoryNumberInventory>,
        ledger: Arc<OrderLedger<InMemoryOrderStore>>,
        notifier: RecordingNotifier,
        draw_id: DrawId,
    }

    impl Fixture {
        fn reconciler(&self) -> ReservationReconciler<InMemoryNumberInventory, InMemoryOrderStore, RecordingNotifier> {
            ReservationReconciler::new(
                self.inventory.clone(),
                self.ledger.clone(),
                self.notifier.clone(),
                SweeperConfig {
                    grace: Duration::from_secs(30),
                    ..SweeperConfig::default()
                },
            )
        }

        async fn hold(&self, number: i32, holder: OrderId) -> NumberCell {
            self.inventory
                .reserve_single_by_value(self.draw_id, number, None, holder)
                .await
                .unwrap()
        }

        async fn order(&self, order_id: OrderId, cell: &NumberCell) {
            self.ledger
                .create_order(CreateOrder::with_ttl(
                    order_id,
                    UserId::new(1),
                    self.draw_id,
                    vec![OrderLine {
                        cell_id: cell.id,
                        number: cell.number,
                        series: cell.series,
                    }],
                    Money::from_cents(100),
                    ChronoDuration::minutes(-5),
                ))
                .await
                .unwrap();
        }

        async fn cell(&self, number: i32) -> NumberCell {
            self.inventory.find_cell(self.draw_id, number, 1).await.unwrap()
        }
    }

    async fn fixture(ttl: ChronoDuration) -> Fixture {
        let inventory = Arc::new(InMemoryNumberInventory::with_reservation_ttl(ttl));
        let draw_id = DrawId::new();
        inventory
            .configure_draw(DrawConfig {
                draw_id,
                min_number: 0,
                max_number: 9,
                total_series: 1,
                ticket_price: Money::from_cents(100),
            })
            .await
            .unwrap();
        Fixture {
            inventory,
            ledger: Arc::new(OrderLedger::new(InMemoryOrderStore::new())),
            notifier: RecordingNotifier::default(),
            draw_id,
        }
    }

    #[tokio::test]
    async fn test_releases_cells_of_unknown_and_closed_orders() {
        let f = fixture(ChronoDuration::minutes(-5)).await;
        let never_ordered = OrderId::new();
        let cancelled = OrderId::new();
        let orphan = f.hold(1, never_ordered).await;
        let cell = f.hold(2, cancelled).await;
        f.order(cancelled, &cell).await;
        f.ledger.cancel_order(cancelled, "user").await.unwrap();

        let report = f.reconciler().reconcile_once().await.unwrap();

        assert_eq!(report.found, 2);
        assert_eq!(report.released, 2);
        assert_eq!(report.failed, 0);
        for number in [1, 2] {
            let cell = f.cell(number).await;
            assert_eq!(cell.status, CellStatus::Available);
            assert_eq!(cell.reserving_order_id, None);
        }
        let released = f.notifier.released.lock().unwrap().clone();
        assert!(released.contains(&orphan.id));
        assert!(released.contains(&cell.id));
    }

    #[tokio::test]
    async fn test_pending_order_keeps_its_cells() {
        let f = fixture(ChronoDuration::minutes(-5)).await;
        let pending = OrderId::new();
        let cell = f.hold(3, pending).await;
        f.order(pending, &cell).await;

        let report = f.reconciler().reconcile_once().await.unwrap();

        assert_eq!(report.found, 1);
        assert_eq!(report.released, 0);
        assert_eq!(f.cell(3).await.reserving_order_id, Some(pending));
    }

    #[tokio::test]
    async fn test_completed_order_gets_its_cells_sold() {
        let f = fixture(ChronoDuration::minutes(-5)).await;
        let order_id = OrderId::new();
        let cell = f.hold(4, order_id).await;
        f.ledger
            .create_order(CreateOrder::with_ttl(
                order_id,
                UserId::new(1),
                f.draw_id,
                vec![OrderLine {
                    cell_id: cell.id,
                    number: 4,
                    series: 1,
                }],
                Money::from_cents(100),
                ChronoDuration::minutes(5),
            ))
            .await
            .unwrap();
        let completion = f.ledger.complete_order(order_id, "tx-1").await.unwrap();

        let report = f.reconciler().reconcile_once().await.unwrap();

        assert_eq!(report.sold, 1);
        let cell = f.cell(4).await;
        assert_eq!(cell.status, CellStatus::Sold);
        assert_eq!(cell.sold_ticket_id, completion.order.ticket_id());
    }

    #[tokio::test]
    async fn test_reservations_within_grace_are_left_alone() {
        let f = fixture(ChronoDuration::seconds(-5)).await;
        let holder = OrderId::new();
        f.hold(5, holder).await;

        let report = f.reconciler().reconcile_once().await.unwrap();

        assert_eq!(report, ReconcileReport::default());
        assert_eq!(f.cell(5).await.reserving_order_id, Some(holder));
    }
}
