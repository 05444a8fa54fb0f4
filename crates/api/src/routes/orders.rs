//! Order lookup, completion and cancellation endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::OrderId;
use inventory::NumberInventory;
use ledger::{Order, OrderStore, Ticket};
use serde::{Deserialize, Serialize};

use super::parse_uuid;
use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CompleteOrderRequest {
    #[serde(alias = "transactionId")]
    pub transaction_id: String,
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "Cancelled by user".to_string()
}

// -- Response types --

#[derive(Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub user_id: i64,
    pub draw_id: String,
    pub status: String,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: i64,
    pub expires_at: String,
    pub ticket_id: Option<String>,
    pub cancellation_reason: Option<String>,
}

#[derive(Serialize)]
pub struct OrderLineResponse {
    pub cell_id: String,
    pub number: i32,
    pub series: i32,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id().to_string(),
            user_id: order.user_id().as_i64(),
            draw_id: order.draw_id().to_string(),
            status: order.status().to_string(),
            lines: order
                .lines()
                .iter()
                .map(|line| OrderLineResponse {
                    cell_id: line.cell_id.to_string(),
                    number: line.number,
                    series: line.series,
                })
                .collect(),
            total_cents: order.total_amount().cents(),
            expires_at: order.expires_at().to_rfc3339(),
            ticket_id: order.ticket_id().map(|t| t.to_string()),
            cancellation_reason: order.cancellation_reason().map(String::from),
        }
    }
}

#[derive(Serialize)]
pub struct TicketResponse {
    pub id: String,
    pub cell_id: String,
    pub number: i32,
    pub series: i32,
    pub purchase_amount_cents: i64,
    pub transaction_id: String,
    pub status: String,
    pub purchased_at: String,
}

impl From<&Ticket> for TicketResponse {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id.to_string(),
            cell_id: ticket.cell_id.to_string(),
            number: ticket.number,
            series: ticket.series,
            purchase_amount_cents: ticket.purchase_amount.cents(),
            transaction_id: ticket.transaction_id.clone(),
            status: ticket.status.as_str().to_string(),
            purchased_at: ticket.purchased_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct CompletionResponse {
    pub order: OrderResponse,
    pub tickets: Vec<TicketResponse>,
    /// False when the order was already terminal.
    pub applied: bool,
}

#[derive(Serialize)]
pub struct TransitionResponse {
    pub order: OrderResponse,
    pub applied: bool,
}

// -- Handlers --

/// GET /orders/:id
#[tracing::instrument(skip(state))]
pub async fn get<I: NumberInventory + 'static, S: OrderStore + 'static>(
    State(state): State<Arc<AppState<I, S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state
        .ledger
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {id} not found")))?;

    Ok(Json(OrderResponse::from(&order)))
}

/// GET /orders/:id/tickets
#[tracing::instrument(skip(state))]
pub async fn tickets<I: NumberInventory + 'static, S: OrderStore + 'static>(
    State(state): State<Arc<AppState<I, S>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<TicketResponse>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    if state.ledger.get_order(order_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Order {id} not found")));
    }

    let tickets = state.ledger.tickets(order_id).await?;
    Ok(Json(tickets.iter().map(TicketResponse::from).collect()))
}

/// POST /orders/:id/complete — record payment and issue tickets.
#[tracing::instrument(skip(state, req))]
pub async fn complete<I: NumberInventory + 'static, S: OrderStore + 'static>(
    State(state): State<Arc<AppState<I, S>>>,
    Path(id): Path<String>,
    Json(req): Json<CompleteOrderRequest>,
) -> Result<Json<CompletionResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    if req.transaction_id.trim().is_empty() {
        return Err(ApiError::BadRequest("transaction_id is required".to_string()));
    }

    let completion = state
        .coordinator
        .complete_order(order_id, &req.transaction_id)
        .await?;

    Ok(Json(CompletionResponse {
        order: OrderResponse::from(&completion.order),
        tickets: completion.tickets.iter().map(TicketResponse::from).collect(),
        applied: completion.applied,
    }))
}

/// POST /orders/:id/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<I: NumberInventory + 'static, S: OrderStore + 'static>(
    State(state): State<Arc<AppState<I, S>>>,
    Path(id): Path<String>,
    Json(req): Json<CancelOrderRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;

    let transition = state.coordinator.cancel_order(order_id, &req.reason).await?;

    Ok(Json(TransitionResponse {
        order: OrderResponse::from(&transition.order),
        applied: transition.applied,
    }))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    Ok(OrderId::from_uuid(parse_uuid(id)?))
}
