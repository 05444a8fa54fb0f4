//! Health check endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use inventory::NumberInventory;
use ledger::OrderStore;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub expiry_timers: usize,
}

/// GET /health — liveness plus a few in-process gauges.
pub async fn check<I: NumberInventory + 'static, S: OrderStore + 'static>(
    State(state): State<Arc<AppState<I, S>>>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: state.rooms.connection_count().await,
        expiry_timers: state.coordinator.scheduler().armed_count().await,
    })
}
