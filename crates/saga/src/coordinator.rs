//! Order-side reactions: reservations become orders, timers expire them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{IntegrationEvent, NumbersReservedData, OrderId, OrderTimeoutData};
use ledger::{
    Completion, CreateOrder, ExpiryTrigger, ExtendOrder, LedgerError, Order, OrderError,
    OrderLedger, OrderLine, OrderStatus, OrderStore, Transition,
};

use crate::Result;
use crate::bus::EventBus;
use crate::consumer::EventHandler;
use crate::scheduler::ExpiryScheduler;

/// Outcome of adding reserved cells to an existing order.
enum Extension {
    /// The order holds the cells.
    Applied(Order),
    /// The order cannot take them; the reservation becomes a new order.
    Refused,
}

/// Drives the ledger from bus events and keeps expiry timers in step with
/// order state.
///
/// Consumes `NumbersReserved` and `OrderTimeout`. Completion and cancellation
/// requests from the API also go through here so the order's timer is
/// disarmed once it turns terminal.
pub struct OrderCoordinator<S: OrderStore, B> {
    ledger: Arc<OrderLedger<S>>,
    scheduler: ExpiryScheduler<B>,
}

impl<S, B> OrderCoordinator<S, B>
where
    S: OrderStore,
    B: EventBus + Clone + 'static,
{
    pub fn new(ledger: Arc<OrderLedger<S>>, scheduler: ExpiryScheduler<B>) -> Self {
        Self { ledger, scheduler }
    }

    pub fn ledger(&self) -> &OrderLedger<S> {
        &self.ledger
    }

    pub fn scheduler(&self) -> &ExpiryScheduler<B> {
        &self.scheduler
    }

    /// Re-arms timers for every Pending order. Call once at startup.
    pub async fn recover(&self) -> Result<usize> {
        let pending = self.ledger.pending_orders().await?;
        Ok(self.scheduler.rearm(&pending).await)
    }

    /// Completes an order and disarms its timer.
    pub async fn complete_order(
        &self,
        order_id: OrderId,
        transaction_id: &str,
    ) -> ledger::Result<Completion> {
        let result = self.ledger.complete_order(order_id, transaction_id).await;
        if matches!(
            result,
            Ok(_) | Err(LedgerError::Order(OrderError::Expired))
        ) {
            self.scheduler.cancel(order_id).await;
        }
        result
    }

    /// Cancels an order and disarms its timer.
    pub async fn cancel_order(&self, order_id: OrderId, reason: &str) -> ledger::Result<Transition> {
        let transition = self.ledger.cancel_order(order_id, reason).await?;
        self.scheduler.cancel(order_id).await;
        Ok(transition)
    }

    async fn on_numbers_reserved(&self, data: &NumbersReservedData) -> Result<()> {
        let lines: Vec<OrderLine> = data
            .cell_ids
            .iter()
            .zip(&data.numbers)
            .zip(&data.series)
            .map(|((cell_id, number), series)| OrderLine {
                cell_id: *cell_id,
                number: *number,
                series: *series,
            })
            .collect();

        if data.is_add_to_existing {
            if let Some(existing_id) = data.existing_order_id {
                match self.try_extend(existing_id, &lines, data).await? {
                    Extension::Applied(order) => {
                        if order.status() == OrderStatus::Pending {
                            self.scheduler.schedule(&order).await;
                        }
                        return Ok(());
                    }
                    Extension::Refused => {}
                }
            }
        }

        let creation = self
            .ledger
            .create_order(CreateOrder::new(
                data.order_id,
                data.user_id,
                data.draw_id,
                lines,
                data.total_amount,
                data.expires_at,
            ))
            .await?;
        if creation.order.status() == OrderStatus::Pending {
            self.scheduler.schedule(&creation.order).await;
        }
        Ok(())
    }

    /// Adds the reserved lines to `existing_id`.
    ///
    /// A redelivered reservation whose cells the order already holds is
    /// `Applied` whatever the order's status: the order's own terminal event
    /// settles those cells, so no new order is opened for them.
    async fn try_extend(
        &self,
        existing_id: OrderId,
        lines: &[OrderLine],
        data: &NumbersReservedData,
    ) -> Result<Extension> {
        if let Some(order) = self.ledger.get_order(existing_id).await? {
            let held = order.cell_ids();
            if data.cell_ids.iter().all(|id| held.contains(id)) {
                tracing::info!(order_id = %existing_id, "cells already on order, skipping duplicate extension");
                return Ok(Extension::Applied(order));
            }
        }

        let cmd = ExtendOrder::new(
            existing_id,
            lines.to_vec(),
            data.total_amount,
            data.expires_at,
        )
        .reserved_under(data.order_id);
        match self.ledger.extend_order(cmd).await {
            Ok(order) => Ok(Extension::Applied(order)),
            Err(LedgerError::Order(error @ OrderError::NotExtendable { .. })) => {
                tracing::warn!(
                    order_id = %existing_id,
                    fallback_order_id = %data.order_id,
                    %error,
                    "existing order cannot take more cells, opening a new order"
                );
                Ok(Extension::Refused)
            }
            Err(LedgerError::OrderNotFound(_)) => {
                tracing::warn!(
                    order_id = %existing_id,
                    fallback_order_id = %data.order_id,
                    "existing order not found, opening a new order"
                );
                Ok(Extension::Refused)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn on_order_timeout(&self, data: &OrderTimeoutData) -> Result<()> {
        let order_id = data.order_id;
        let Some(order) = self.ledger.get_order(order_id).await? else {
            tracing::warn!(%order_id, "timeout for unknown order, ignoring");
            return Ok(());
        };

        if order.status().is_terminal() {
            tracing::info!(%order_id, status = %order.status(), "timeout for terminal order, ignoring");
            return Ok(());
        }
        if order.expires_at() > Utc::now() {
            // Extended since the timer was armed.
            tracing::info!(%order_id, expires_at = %order.expires_at(), "stale timeout, re-arming");
            self.scheduler.schedule(&order).await;
            return Ok(());
        }

        self.ledger
            .expire_order(order_id, ExpiryTrigger::Timer)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl<S, B> EventHandler for OrderCoordinator<S, B>
where
    S: OrderStore,
    B: EventBus + Clone + 'static,
{
    fn name(&self) -> &'static str {
        "order-coordinator"
    }

    async fn handle(&self, event: &IntegrationEvent) -> Result<()> {
        match event {
            IntegrationEvent::NumbersReserved(data) => self.on_numbers_reserved(data).await,
            IntegrationEvent::OrderTimeout(data) => self.on_order_timeout(data).await,
            _ => Ok(()),
        }
    }
}
