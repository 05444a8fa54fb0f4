//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use gateway::GENERIC_ERROR_MESSAGE;
use inventory::InventoryError;
use ledger::{LedgerError, OrderError};

/// API-level error type that maps to HTTP responses.
///
/// Failures the caller can act on carry their own message. Everything else
/// is logged and answered with a generic retryable message.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Inventory(InventoryError),
    Ledger(LedgerError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Inventory(err) => inventory_error_to_response(err),
            ApiError::Ledger(err) => ledger_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn inventory_error_to_response(err: InventoryError) -> (StatusCode, String) {
    match &err {
        InventoryError::NotAvailable { .. } | InventoryError::DrawAlreadyConfigured(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        InventoryError::DrawNotFound(_) | InventoryError::CellNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        InventoryError::InvalidDraw(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => internal(&err),
    }
}

fn ledger_error_to_response(err: LedgerError) -> (StatusCode, String) {
    match &err {
        LedgerError::OrderNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        LedgerError::Order(OrderError::Expired) => (StatusCode::CONFLICT, OrderError::Expired.to_string()),
        LedgerError::Order(OrderError::InvalidStateTransition { .. }) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        LedgerError::Order(
            OrderError::NoCells | OrderError::InvalidAmount(_) | OrderError::NotExtendable { .. },
        ) => (StatusCode::BAD_REQUEST, err.to_string()),
        _ => internal(&err),
    }
}

fn internal(err: &dyn std::error::Error) -> (StatusCode, String) {
    tracing::error!(error = %err, "internal server error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        GENERIC_ERROR_MESSAGE.to_string(),
    )
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::Inventory(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}
