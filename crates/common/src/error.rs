use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::types::SessionState;

/// Outcome of a single failed send attempt.
///
/// Both variants are terminal for the message: the dispatcher logs them and
/// moves on to the next queued notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Messaging session not ready (state: {state})")]
    NotReady { state: SessionState },

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Delivery(DeliveryError::NotReady { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, self.to_string())
            }
            AppError::Delivery(DeliveryError::DeliveryFailed(_)) => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
            AppError::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = json!({ "status": "error", "error": message });
        (status, Json(body)).into_response()
    }
}
