//! Cart reservation and room handling for push-channel clients.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{
    ConnectionId, DrawId, IntegrationEvent, NumbersReservedData, OrderId, UserId,
};
use inventory::{
    DEFAULT_RESERVATION_TTL_SECS, InventoryError, MAX_QUANTITY_PER_REQUEST, NumberCell,
    NumberInventory, NumberInventoryExt,
};

use crate::error::{GENERIC_ERROR_MESSAGE, GatewayError, Result};
use crate::messages::{CartItem, CellSummary, ClientFrame, PushMessage, ReservationConfirmation};
use crate::rooms::RoomRegistry;

/// Hands integration events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: IntegrationEvent) -> std::result::Result<(), String>;
}

/// Outcome of a successful cart reservation.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub confirmation: ReservationConfirmation,
    pub cells: Vec<NumberCell>,
}

/// Real-time entry point for buyers.
///
/// Reserves carts against the inventory, announces them with
/// `NumbersReserved`, and keeps draw rooms informed. Rooms are a
/// presentation concern: they hold connection ids, never inventory state.
pub struct ReservationGateway<I, P> {
    inventory: Arc<I>,
    publisher: P,
    rooms: RoomRegistry,
}

impl<I, P> ReservationGateway<I, P>
where
    I: NumberInventory,
    P: EventPublisher,
{
    pub fn new(inventory: Arc<I>, publisher: P, rooms: RoomRegistry) -> Self {
        Self {
            inventory,
            publisher,
            rooms,
        }
    }

    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Applies one client frame, replying to the caller on failure.
    pub async fn handle_frame(&self, connection_id: ConnectionId, frame: ClientFrame) {
        let result = match frame {
            ClientFrame::Join { draw_id } => self.join_draw(connection_id, draw_id).await,
            ClientFrame::Leave { draw_id } => self.leave_draw(connection_id, draw_id).await,
            ClientFrame::Refresh { draw_id } => self.refresh(connection_id, draw_id).await,
            ClientFrame::Reserve {
                draw_id,
                user_id,
                items,
                existing_order_id,
            } => self
                .reserve(connection_id, user_id, draw_id, &items, existing_order_id)
                .await
                .map(|_| ()),
        };

        if let Err(e) = result {
            self.reply_error(connection_id, &e).await;
        }
    }

    /// Joins the draw's room and sends the caller an availability snapshot.
    #[tracing::instrument(skip(self))]
    pub async fn join_draw(&self, connection_id: ConnectionId, draw_id: DrawId) -> Result<()> {
        self.inventory.require_draw(draw_id).await?;
        if !self.rooms.join(connection_id, draw_id).await {
            return Err(GatewayError::UnknownConnection(connection_id));
        }
        self.send_snapshot(connection_id, draw_id).await
    }

    pub async fn leave_draw(&self, connection_id: ConnectionId, draw_id: DrawId) -> Result<()> {
        if !self.rooms.leave(connection_id, draw_id).await {
            return Err(GatewayError::UnknownConnection(connection_id));
        }
        Ok(())
    }

    /// Re-sends the availability snapshot for a draw.
    #[tracing::instrument(skip(self))]
    pub async fn refresh(&self, connection_id: ConnectionId, draw_id: DrawId) -> Result<()> {
        self.inventory.require_draw(draw_id).await?;
        self.send_snapshot(connection_id, draw_id).await
    }

    /// Reserves a whole cart, or nothing.
    ///
    /// For each line the lowest Available series are picked, then every
    /// picked cell is reserved in one all-or-nothing call. The cells are
    /// always reserved under a fresh order id, which the published event
    /// carries. With `existing_order_id` the order side hands them to that
    /// order once it has been extended, or opens the fresh id as a new order
    /// if the existing one can no longer take cells. Until then a release of
    /// the existing order cannot touch them.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn reserve(
        &self,
        connection_id: ConnectionId,
        user_id: UserId,
        draw_id: DrawId,
        items: &[CartItem],
        existing_order_id: Option<OrderId>,
    ) -> Result<Reservation> {
        let lines = merge_cart(items)?;
        let draw = self.inventory.require_draw(draw_id).await?;

        let mut picked = Vec::new();
        for (&number, &quantity) in &lines {
            if !draw.contains_number(number) {
                return Err(GatewayError::NumberOutOfRange { draw_id, number });
            }
            let cells = self
                .inventory
                .next_available_series(draw_id, number, quantity)
                .await?;
            if cells.is_empty() {
                metrics::counter!("reservation_failures_total").increment(1);
                return Err(not_available(format!(
                    "Number {number} is not available in any series"
                )));
            }
            if cells.len() < quantity {
                metrics::counter!("reservation_failures_total").increment(1);
                return Err(not_available(format!(
                    "Insufficient stock. Requested {quantity} series of number {number}, but only {} available",
                    cells.len()
                )));
            }
            picked.extend(cells.into_iter().map(|c| c.id));
        }

        let reservation_id = OrderId::new();
        let cells = self.inventory.reserve_cells(&picked, reservation_id).await?;

        let now = Utc::now();
        let expires_at = reservation_expiry(&cells, now);
        let target_order = existing_order_id.unwrap_or(reservation_id);
        let total_amount = draw.ticket_price.times(cells.len());

        let event = IntegrationEvent::NumbersReserved(NumbersReservedData {
            order_id: reservation_id,
            draw_id,
            user_id,
            cell_ids: cells.iter().map(|c| c.id).collect(),
            numbers: cells.iter().map(|c| c.number).collect(),
            series: cells.iter().map(|c| c.series).collect(),
            unit_price: draw.ticket_price,
            total_amount,
            expires_at,
            is_add_to_existing: existing_order_id.is_some(),
            existing_order_id,
        });

        if let Err(e) = self.publisher.publish(event).await {
            tracing::error!(error = %e, order_id = %reservation_id, "failed to publish reservation");
            self.inventory.release_by_order(reservation_id).await?;
            return Err(GatewayError::Bus(e));
        }

        for cell in &cells {
            self.rooms
                .broadcast(
                    draw_id,
                    PushMessage::NumberReserved {
                        draw_id,
                        cell: CellSummary::from(cell),
                    },
                )
                .await;
        }

        let confirmation = ReservationConfirmation {
            order_id: target_order,
            fallback_order_id: existing_order_id.map(|_| reservation_id),
            draw_id,
            cells: cells.iter().map(CellSummary::from).collect(),
            unit_price: draw.ticket_price,
            total_amount,
            expires_at,
            seconds_remaining: (expires_at - now).num_seconds().max(0),
        };
        self.rooms
            .send_to(
                connection_id,
                PushMessage::ReservationConfirmed(confirmation.clone()),
            )
            .await;

        tracing::info!(
            %user_id,
            %draw_id,
            order_id = %target_order,
            count = cells.len(),
            total = %total_amount,
            "cart reserved"
        );
        Ok(Reservation {
            confirmation,
            cells,
        })
    }

    async fn send_snapshot(&self, connection_id: ConnectionId, draw_id: DrawId) -> Result<()> {
        let numbers = self.inventory.availability(draw_id).await?;
        let available_count = numbers.iter().map(|n| n.available_series).sum();
        tracing::debug!(%draw_id, available_count, "sending availability snapshot");

        let delivered = self
            .rooms
            .send_to(
                connection_id,
                PushMessage::AvailableNumbers {
                    draw_id,
                    numbers,
                    available_count,
                },
            )
            .await;
        if delivered {
            Ok(())
        } else {
            Err(GatewayError::UnknownConnection(connection_id))
        }
    }

    async fn reply_error(&self, connection_id: ConnectionId, error: &GatewayError) {
        let message = if error.is_user_facing() {
            tracing::warn!(%connection_id, error = %error, "request rejected");
            error.to_string()
        } else {
            tracing::error!(%connection_id, error = %error, "request failed");
            GENERIC_ERROR_MESSAGE.to_string()
        };
        self.rooms
            .send_to(connection_id, PushMessage::Error { message })
            .await;
    }
}

/// Validates cart lines and sums repeated numbers, keeping number order.
fn merge_cart(items: &[CartItem]) -> Result<BTreeMap<i32, usize>> {
    if items.is_empty() {
        return Err(GatewayError::EmptyCart);
    }
    let mut lines = BTreeMap::new();
    for item in items {
        if item.quantity == 0 || item.quantity > MAX_QUANTITY_PER_REQUEST {
            return Err(GatewayError::InvalidQuantity {
                number: item.number,
                quantity: item.quantity,
            });
        }
        let total = lines.entry(item.number).or_insert(0);
        *total += item.quantity;
        if *total > MAX_QUANTITY_PER_REQUEST {
            return Err(GatewayError::InvalidQuantity {
                number: item.number,
                quantity: *total,
            });
        }
    }
    Ok(lines)
}

fn reservation_expiry(cells: &[NumberCell], now: DateTime<Utc>) -> DateTime<Utc> {
    cells
        .iter()
        .filter_map(|c| c.reservation_expires_at)
        .max()
        .unwrap_or(now + Duration::seconds(DEFAULT_RESERVATION_TTL_SECS))
}

fn not_available(reason: String) -> GatewayError {
    GatewayError::Inventory(InventoryError::NotAvailable { reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_cart_rejects_bad_quantities() {
        assert!(matches!(merge_cart(&[]), Err(GatewayError::EmptyCart)));
        assert!(matches!(
            merge_cart(&[CartItem {
                number: 1,
                quantity: 0
            }]),
            Err(GatewayError::InvalidQuantity { quantity: 0, .. })
        ));
        assert!(matches!(
            merge_cart(&[CartItem {
                number: 1,
                quantity: 11
            }]),
            Err(GatewayError::InvalidQuantity { quantity: 11, .. })
        ));
    }

    #[test]
    fn test_merge_cart_sums_repeated_numbers() {
        let lines = merge_cart(&[
            CartItem {
                number: 9,
                quantity: 2,
            },
            CartItem {
                number: 3,
                quantity: 1,
            },
            CartItem {
                number: 9,
                quantity: 3,
            },
        ])
        .unwrap();

        assert_eq!(lines.into_iter().collect::<Vec<_>>(), vec![(3, 1), (9, 5)]);
    }

    #[test]
    fn test_merge_cart_caps_merged_quantity() {
        let result = merge_cart(&[
            CartItem {
                number: 9,
                quantity: 6,
            },
            CartItem {
                number: 9,
                quantity: 6,
            },
        ]);

        assert!(matches!(
            result,
            Err(GatewayError::InvalidQuantity { quantity: 12, .. })
        ));
    }
}
