//! Draw configuration and availability endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{DrawId, Money};
use inventory::{Draw, DrawConfig, NumberAvailability, NumberInventory};
use ledger::OrderStore;
use serde::{Deserialize, Serialize};

use super::parse_uuid;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ConfigureDrawRequest {
    pub draw_id: Option<String>,
    pub min_number: i32,
    pub max_number: i32,
    pub total_series: i32,
    pub ticket_price_cents: i64,
}

#[derive(Serialize)]
pub struct DrawResponse {
    pub id: String,
    pub min_number: i32,
    pub max_number: i32,
    pub total_series: i32,
    pub ticket_price_cents: i64,
    pub created_at: String,
}

impl From<Draw> for DrawResponse {
    fn from(draw: Draw) -> Self {
        Self {
            id: draw.id.to_string(),
            min_number: draw.min_number,
            max_number: draw.max_number,
            total_series: draw.total_series,
            ticket_price_cents: draw.ticket_price.cents(),
            created_at: draw.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    pub draw_id: String,
    pub available_count: usize,
    pub numbers: Vec<NumberAvailability>,
}

/// POST /draws — create a draw and its cells.
#[tracing::instrument(skip(state, req))]
pub async fn configure<I: NumberInventory + 'static, S: OrderStore + 'static>(
    State(state): State<Arc<AppState<I, S>>>,
    Json(req): Json<ConfigureDrawRequest>,
) -> Result<(StatusCode, Json<DrawResponse>), ApiError> {
    let draw_id = match req.draw_id.as_deref() {
        Some(id) => DrawId::from_uuid(parse_uuid(id)?),
        None => DrawId::new(),
    };

    let draw = state
        .inventory
        .configure_draw(DrawConfig {
            draw_id,
            min_number: req.min_number,
            max_number: req.max_number,
            total_series: req.total_series,
            ticket_price: Money::from_cents(req.ticket_price_cents),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(draw.into())))
}

/// GET /draws/:id/availability — per-number availability snapshot.
#[tracing::instrument(skip(state))]
pub async fn availability<I: NumberInventory + 'static, S: OrderStore + 'static>(
    State(state): State<Arc<AppState<I, S>>>,
    Path(id): Path<String>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let draw_id = DrawId::from_uuid(parse_uuid(&id)?);
    if state.inventory.get_draw(draw_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Draw {id} not found")));
    }

    let numbers = state.inventory.availability(draw_id).await?;
    Ok(Json(AvailabilityResponse {
        draw_id: draw_id.to_string(),
        available_count: numbers.iter().map(|n| n.available_series).sum(),
        numbers,
    }))
}
