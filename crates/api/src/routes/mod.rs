//! HTTP route handlers.

pub mod draws;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod ws;

use uuid::Uuid;

use crate::error::ApiError;

pub(crate) fn parse_uuid(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))
}
