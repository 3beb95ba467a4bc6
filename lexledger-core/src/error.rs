use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

/// Errors surfaced by the billing engine.
#[derive(Debug, Error)]
pub enum BillingError {
    /// An id does not resolve to a non-deleted record.
    #[error("{0}")]
    NotFound(String),

    /// The operation is not allowed in the invoice's current status.
    #[error("{0}")]
    InvalidState(String),

    /// The request itself is malformed or inconsistent.
    #[error("{0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl BillingError {
    pub fn not_found(entity: &str) -> Self {
        BillingError::NotFound(format!("{} not found", entity))
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        BillingError::InvalidState(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        BillingError::Validation(message.into())
    }

    /// Only storage failures are worth retrying, and only some of them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::Storage(e) if e.is_retryable())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;

impl IntoResponse for BillingError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: String,
        }

        let (status, message) = match &self {
            BillingError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            BillingError::InvalidState(msg) | BillingError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            BillingError::Storage(StoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg.clone()),
            BillingError::Storage(err @ StoreError::StaleInvoice(_)) => {
                (StatusCode::CONFLICT, err.to_string())
            }
            BillingError::Storage(err) => {
                error!("Storage failure: {}", err);
                let status = if err.is_retryable() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::INTERNAL_SERVER_ERROR
                };
                (status, "Storage error".to_string())
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
