//! Inventory-side reactions to order lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use common::{DrawId, IntegrationEvent, OrderCompletedData, OrderCreatedData, OrderId};
use gateway::DrawNotifier;
use inventory::{InventoryError, NumberInventory};

use crate::Result;
use crate::consumer::EventHandler;

/// Applies order outcomes to the cells and tells connected clients.
///
/// | event                              | inventory call      |
/// |------------------------------------|---------------------|
/// | `OrderCreated`                     | `attach_to_order`   |
/// | `OrderCompleted`                   | `confirm_sold`      |
/// | `OrderExpired` / `OrderCancelled`  | `release_by_order`  |
pub struct InventoryEventHandler<I, N> {
    inventory: Arc<I>,
    notifier: N,
}

impl<I, N> InventoryEventHandler<I, N>
where
    I: NumberInventory,
    N: DrawNotifier,
{
    pub fn new(inventory: Arc<I>, notifier: N) -> Self {
        Self {
            inventory,
            notifier,
        }
    }

    async fn on_order_created(&self, data: &OrderCreatedData) -> Result<()> {
        match self
            .inventory
            .attach_to_order(
                &data.cell_ids,
                data.order_id,
                data.reserved_under,
                data.expires_at,
            )
            .await
        {
            Ok(cells) => {
                tracing::debug!(order_id = %data.order_id, count = cells.len(), "cells attached to order");
                Ok(())
            }
            Err(InventoryError::NotAvailable { reason }) => {
                // The cells lapsed before the order was recorded. Completing
                // the order will report the mismatch.
                tracing::warn!(
                    order_id = %data.order_id,
                    reserved_under = ?data.reserved_under,
                    %reason,
                    "cells no longer held for order, cannot attach"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_order_completed(&self, data: &OrderCompletedData) -> Result<()> {
        match self
            .inventory
            .confirm_sold(&data.cell_ids, data.order_id, data.ticket_id)
            .await
        {
            Ok(sold) => {
                self.notifier.numbers_sold(data.draw_id, &sold).await;
                Ok(())
            }
            Err(error @ InventoryError::SagaInconsistency { .. }) => {
                metrics::counter!("saga_inconsistencies_total").increment(1);
                tracing::error!(
                    order_id = %data.order_id,
                    ticket_id = %data.ticket_id,
                    %error,
                    "paid order has cells not reserved for it, needs manual reconciliation"
                );
                Err(error.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_order_closed(&self, order_id: OrderId, draw_id: DrawId) -> Result<()> {
        let released = self.inventory.release_by_order(order_id).await?;
        self.notifier.numbers_released(draw_id, &released).await;
        Ok(())
    }
}

#[async_trait]
impl<I, N> EventHandler for InventoryEventHandler<I, N>
where
    I: NumberInventory,
    N: DrawNotifier,
{
    fn name(&self) -> &'static str {
        "inventory"
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<()> {
        match event {
            IntegrationEvent::OrderCreated(data) => self.on_order_created(data).await,
            IntegrationEvent::OrderCompleted(data) => self.on_order_completed(data).await,
            IntegrationEvent::OrderExpired(data) => {
                self.on_order_closed(data.order_id, data.draw_id).await
            }
            IntegrationEvent::OrderCancelled(data) => {
                self.on_order_closed(data.order_id, data.draw_id).await
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::{Duration, Utc};
    use common::{CellId, Money, OrderCancelledData, OrderExpiredData, TicketId, UserId};
    use inventory::{CellStatus, DrawConfig, InMemoryNumberInventory, NumberCell};

    use super::*;
    use crate::SagaError;

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        released: Arc<Mutex<Vec<CellId>>>,
        sold: Arc<Mutex<Vec<CellId>>>,
    }

    #[async_trait]
    impl DrawNotifier for RecordingNotifier {
        async fn numbers_released(&self, _draw_id: DrawId, cells: &[NumberCell]) {
            self.released.lock().unwrap().extend(cells.iter().map(|c| c.id));
        }

        async fn numbers_sold(&self, _draw_id: DrawId, cells: &[NumberCell]) {
            self.sold.lock().unwrap().extend(cells.iter().map(|c| c.id));
        }
    }

    struct Fixture {
        inventory: Arc<InMemoryNumberInventory>,
        notifier: RecordingNotifier,
        handler: InventoryEventHandler<InMemoryNumberInventory, RecordingNotifier>,
        draw_id: DrawId,
    }

    async fn fixture() -> Fixture {
        let inventory = Arc::new(InMemoryNumberInventory::new());
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
        let notifier = RecordingNotifier::default();
        let handler = InventoryEventHandler::new(inventory.clone(), notifier.clone());
        Fixture {
            inventory,
            notifier,
            handler,
            draw_id,
        }
    }

    async fn reserve(f: &Fixture, number: i32, order_id: OrderId) -> NumberCell {
        f.inventory
            .reserve_single_by_value(f.draw_id, number, None, order_id)
            .await
            .unwrap()
    }

    fn completed(f: &Fixture, order_id: OrderId, cell_ids: Vec<CellId>, ticket_id: TicketId) -> IntegrationEvent {
        IntegrationEvent::OrderCompleted(OrderCompletedData {
            order_id,
            ticket_id,
            draw_id: f.draw_id,
            user_id: UserId::new(1),
            cell_ids,
            transaction_id: "tx".into(),
        })
    }

    #[tokio::test]
    async fn test_completion_sells_cells_once() {
        let f = fixture().await;
        let order_id = OrderId::new();
        let cell = reserve(&f, 4, order_id).await;
        let event = completed(&f, order_id, vec![cell.id], TicketId::new());

        f.handler.handle(&event).await.unwrap();
        f.handler.handle(&event).await.unwrap();

        let cell = f.inventory.find_cell(f.draw_id, 4, 1).await.unwrap();
        assert_eq!(cell.status, CellStatus::Sold);
        assert_eq!(f.notifier.sold.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_of_released_cell_is_permanent_failure() {
        let f = fixture().await;
        let order_id = OrderId::new();
        let cell = reserve(&f, 4, order_id).await;
        f.inventory.release_by_order(order_id).await.unwrap();

        let result = f
            .handler
            .handle(&completed(&f, order_id, vec![cell.id], TicketId::new()))
            .await;

        match result {
            Err(e @ SagaError::Inventory(InventoryError::SagaInconsistency { .. })) => {
                assert!(e.is_permanent())
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_expiry_and_cancellation_release_cells() {
        let f = fixture().await;
        let expired_order = OrderId::new();
        let cancelled_order = OrderId::new();
        let a = reserve(&f, 1, expired_order).await;
        let b = reserve(&f, 2, cancelled_order).await;

        f.handler
            .handle(&IntegrationEvent::OrderExpired(OrderExpiredData {
                order_id: expired_order,
                draw_id: f.draw_id,
                cell_ids: vec![a.id],
            }))
            .await
            .unwrap();
        f.handler
            .handle(&IntegrationEvent::OrderCancelled(OrderCancelledData {
                order_id: cancelled_order,
                draw_id: f.draw_id,
                user_id: UserId::new(1),
                cell_ids: vec![b.id],
                reason: "user".into(),
            }))
            .await
            .unwrap();

        for number in [1, 2] {
            let cell = f.inventory.find_cell(f.draw_id, number, 1).await.unwrap();
            assert_eq!(cell.status, CellStatus::Available);
            assert_eq!(cell.reserving_order_id, None);
        }
        assert_eq!(f.notifier.released.lock().unwrap().len(), 2);
    }

    fn created(f: &Fixture, order_id: OrderId, cell_ids: Vec<CellId>, reserved_under: Option<OrderId>) -> IntegrationEvent {
        IntegrationEvent::OrderCreated(OrderCreatedData {
            order_id,
            draw_id: f.draw_id,
            user_id: UserId::new(1),
            cell_ids,
            expires_at: Utc::now() + Duration::minutes(10),
            reserved_under,
        })
    }

    #[tokio::test]
    async fn test_order_created_takes_over_reserved_cells() {
        let f = fixture().await;
        let reservation_id = OrderId::new();
        let order_id = OrderId::new();
        let cell = reserve(&f, 6, reservation_id).await;
        let event = created(&f, order_id, vec![cell.id], Some(reservation_id));
        let IntegrationEvent::OrderCreated(data) = &event else {
            unreachable!()
        };
        let expires_at = data.expires_at;

        f.handler.handle(&event).await.unwrap();

        let cell = f.inventory.find_cell(f.draw_id, 6, 1).await.unwrap();
        assert_eq!(cell.reserving_order_id, Some(order_id));
        assert_eq!(cell.reservation_expires_at, Some(expires_at));
    }

    #[tokio::test]
    async fn test_order_created_leaves_other_orders_cells_alone() {
        let f = fixture().await;
        let holder = OrderId::new();
        let cell = reserve(&f, 6, holder).await;

        let result = f
            .handler
            .handle(&created(&f, OrderId::new(), vec![cell.id], Some(OrderId::new())))
            .await;

        assert!(result.is_ok());
        let cell = f.inventory.find_cell(f.draw_id, 6, 1).await.unwrap();
        assert_eq!(cell.reserving_order_id, Some(holder));
    }

    #[tokio::test]
    async fn test_completion_cannot_sell_another_orders_cell() {
        let f = fixture().await;
        let holder = OrderId::new();
        let cell = reserve(&f, 8, holder).await;

        let result = f
            .handler
            .handle(&completed(&f, OrderId::new(), vec![cell.id], TicketId::new()))
            .await;

        assert!(matches!(
            result,
            Err(SagaError::Inventory(InventoryError::SagaInconsistency { .. }))
        ));
        let cell = f.inventory.find_cell(f.draw_id, 8, 1).await.unwrap();
        assert_eq!(cell.status, CellStatus::Reserved);
        assert_eq!(cell.reserving_order_id, Some(holder));
        assert!(f.notifier.sold.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_order_created_for_lapsed_cells_is_tolerated() {
        let f = fixture().await;
        let cell = f.inventory.find_cell(f.draw_id, 3, 1).await.unwrap();

        let result = f
            .handler
            .handle(&created(&f, OrderId::new(), vec![cell.id], None))
            .await;

        assert!(result.is_ok());
    }
}
