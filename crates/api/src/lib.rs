//! HTTP and WebSocket server for lottery number reservations.
//!
//! REST endpoints configure draws and settle orders; the WebSocket channel
//! carries live availability and reservations. Structured logging goes
//! through tracing and metrics are exposed for Prometheus.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use inventory::NumberInventory;
use ledger::OrderStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, LogFormat};
pub use error::ApiError;
pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<I, S>(state: Arc<AppState<I, S>>, metrics_handle: PrometheusHandle) -> Router
where
    I: NumberInventory + 'static,
    S: OrderStore + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<I, S>))
        .route("/draws", post(routes::draws::configure::<I, S>))
        .route(
            "/draws/{id}/availability",
            get(routes::draws::availability::<I, S>),
        )
        .route("/orders/{id}", get(routes::orders::get::<I, S>))
        .route("/orders/{id}/tickets", get(routes::orders::tickets::<I, S>))
        .route("/orders/{id}/complete", post(routes::orders::complete::<I, S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<I, S>))
        .route("/ws", get(routes::ws::upgrade::<I, S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
