//! Order aggregate.

use chrono::{DateTime, Utc};
use common::{
    CellId, DrawId, IntegrationEvent, Money, OrderCancelledData, OrderCompletedData,
    OrderCreatedData, OrderExpiredData, OrderId, TicketId, UserId, Version,
};
use serde::{Deserialize, Serialize};

use super::{CreateOrder, ExtendOrder, OrderError, OrderStatus, Ticket, TicketStatus};

/// One reserved cell on an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub cell_id: CellId,
    pub number: i32,
    pub series: i32,
}

/// A buyer's order for one draw.
///
/// Command methods validate against the current status and mutate the
/// order in place, returning the integration event to stage. They never
/// touch storage; the ledger service persists the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    user_id: UserId,
    draw_id: DrawId,
    status: OrderStatus,
    expires_at: DateTime<Utc>,
    lines: Vec<OrderLine>,
    total_amount: Money,
    ticket_id: Option<TicketId>,
    cancellation_reason: Option<String>,
    version: Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Order {
    /// Opens a Pending order and returns the `OrderCreated` event for it.
    pub fn create(cmd: CreateOrder) -> Result<(Self, IntegrationEvent), OrderError> {
        if cmd.lines.is_empty() {
            return Err(OrderError::NoCells);
        }
        if !cmd.total_amount.is_positive() {
            return Err(OrderError::InvalidAmount(cmd.total_amount));
        }

        let now = Utc::now();
        let order = Self {
            id: cmd.order_id,
            user_id: cmd.user_id,
            draw_id: cmd.draw_id,
            status: OrderStatus::Pending,
            expires_at: cmd.expires_at,
            lines: cmd.lines,
            total_amount: cmd.total_amount,
            ticket_id: None,
            cancellation_reason: None,
            version: Version::initial(),
            created_at: now,
            updated_at: now,
        };
        let event = order.created_event(order.cell_ids(), None);
        Ok((order, event))
    }

    /// Rebuilds an order from stored fields.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: OrderId,
        user_id: UserId,
        draw_id: DrawId,
        status: OrderStatus,
        expires_at: DateTime<Utc>,
        lines: Vec<OrderLine>,
        total_amount: Money,
        ticket_id: Option<TicketId>,
        cancellation_reason: Option<String>,
        version: Version,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            draw_id,
            status,
            expires_at,
            lines,
            total_amount,
            ticket_id,
            cancellation_reason,
            version,
            created_at,
            updated_at,
        }
    }

    // Query methods

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn draw_id(&self) -> DrawId {
        self.draw_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn cell_ids(&self) -> Vec<CellId> {
        self.lines.iter().map(|l| l.cell_id).collect()
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    /// First ticket issued on completion.
    pub fn ticket_id(&self) -> Option<TicketId> {
        self.ticket_id
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    // Command methods

    /// Adds lines to a live Pending order.
    ///
    /// The expiry only moves forward: it becomes the later of the current and
    /// requested expiry. Returns an `OrderCreated` event covering the new cells.
    pub fn extend(
        &mut self,
        cmd: ExtendOrder,
        now: DateTime<Utc>,
    ) -> Result<IntegrationEvent, OrderError> {
        if !self.status.can_extend() || self.is_expired_at(now) {
            return Err(OrderError::NotExtendable {
                status: self.status,
                expired: self.is_expired_at(now),
            });
        }
        if cmd.lines.is_empty() {
            return Err(OrderError::NoCells);
        }
        if !cmd.additional_amount.is_positive() {
            return Err(OrderError::InvalidAmount(cmd.additional_amount));
        }

        let added: Vec<CellId> = cmd.lines.iter().map(|l| l.cell_id).collect();
        self.lines.extend(cmd.lines);
        self.total_amount = self.total_amount + cmd.additional_amount;
        self.expires_at = self.expires_at.max(cmd.expires_at);
        self.updated_at = now;
        Ok(self.created_event(added, cmd.reserved_under))
    }

    /// Completes the order and issues one Active ticket per cell.
    ///
    /// The total is split evenly across tickets, remainder cents on the first.
    pub fn complete(
        &mut self,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(Vec<Ticket>, IntegrationEvent), OrderError> {
        self.ensure(self.status.can_complete(), "complete")?;
        if self.is_expired_at(now) {
            return Err(OrderError::Expired);
        }

        let amounts = self.total_amount.split(self.lines.len());
        let tickets: Vec<Ticket> = self
            .lines
            .iter()
            .zip(amounts)
            .map(|(line, amount)| Ticket {
                id: TicketId::new(),
                order_id: self.id,
                cell_id: line.cell_id,
                draw_id: self.draw_id,
                user_id: self.user_id,
                number: line.number,
                series: line.series,
                purchase_amount: amount,
                transaction_id: transaction_id.to_string(),
                status: TicketStatus::Active,
                purchased_at: now,
            })
            .collect();
        let first_ticket = tickets.first().map(|t| t.id).ok_or(OrderError::NoCells)?;

        self.status = OrderStatus::Completed;
        self.ticket_id = Some(first_ticket);
        self.updated_at = now;

        let event = IntegrationEvent::OrderCompleted(OrderCompletedData {
            order_id: self.id,
            ticket_id: first_ticket,
            draw_id: self.draw_id,
            user_id: self.user_id,
            cell_ids: self.cell_ids(),
            transaction_id: transaction_id.to_string(),
        });
        Ok((tickets, event))
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<IntegrationEvent, OrderError> {
        self.ensure(self.status.can_expire(), "expire")?;

        self.status = OrderStatus::Expired;
        self.updated_at = now;
        Ok(IntegrationEvent::OrderExpired(OrderExpiredData {
            order_id: self.id,
            draw_id: self.draw_id,
            cell_ids: self.cell_ids(),
        }))
    }

    pub fn cancel(
        &mut self,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<IntegrationEvent, OrderError> {
        self.ensure(self.status.can_cancel(), "cancel")?;

        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(reason.to_string());
        self.updated_at = now;
        Ok(IntegrationEvent::OrderCancelled(OrderCancelledData {
            order_id: self.id,
            draw_id: self.draw_id,
            user_id: self.user_id,
            cell_ids: self.cell_ids(),
            reason: reason.to_string(),
        }))
    }

    /// Advances the version token after a committed write.
    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.next();
    }

    fn ensure(&self, allowed: bool, action: &'static str) -> Result<(), OrderError> {
        if allowed {
            Ok(())
        } else {
            Err(OrderError::InvalidStateTransition {
                current_status: self.status,
                action,
            })
        }
    }

    fn created_event(&self, cell_ids: Vec<CellId>, reserved_under: Option<OrderId>) -> IntegrationEvent {
        IntegrationEvent::OrderCreated(OrderCreatedData {
            order_id: self.id,
            draw_id: self.draw_id,
            user_id: self.user_id,
            cell_ids,
            expires_at: self.expires_at,
            reserved_under,
        })
    }
}
