//! Delivery notification intake.

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use courier_common::error::AppError;
use courier_common::types::QueuedMessage;
use courier_engine::{phone, template};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/notify-delivery", post(notify_delivery))
}

/// Request body for a delivery notification.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyDeliveryRequest {
    pub phone_number: Option<String>,
    pub command_id: Option<String>,
}

impl NotifyDeliveryRequest {
    /// Both fields must be present and non-empty.
    fn into_parts(self) -> Result<(String, String), AppError> {
        match (
            self.phone_number.filter(|s| !s.is_empty()),
            self.command_id.filter(|s| !s.is_empty()),
        ) {
            (Some(phone_number), Some(command_id)) => Ok((phone_number, command_id)),
            _ => Err(AppError::Validation(
                "phoneNumber and commandId are required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NotifyDeliveryResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub queue_position: usize,
    pub estimated_time_minutes: u64,
    pub phone: String,
    pub command_id: String,
}

/// POST /notify-delivery: Queue a "delivery in progress" message.
///
/// Success means the message was accepted into the queue, not that it was
/// delivered.
async fn notify_delivery(
    State(state): State<AppState>,
    payload: Result<Json<NotifyDeliveryRequest>, JsonRejection>,
) -> Result<Json<NotifyDeliveryResponse>, AppError> {
    let Json(request) = payload
        .map_err(|e| AppError::Validation(format!("Invalid request body: {}", e.body_text())))?;
    let (phone_number, command_id) = request.into_parts()?;

    let body = template::render_delivery_message(
        &phone_number,
        &command_id,
        &state.config.tracking_base_url,
    );
    let message = QueuedMessage::new(phone::normalize(&phone_number), body, command_id.clone());

    let receipt = state.dispatcher.enqueue_and_maybe_start(message);

    Ok(Json(NotifyDeliveryResponse {
        status: "success",
        message: "Message added to the delivery queue",
        queue_position: receipt.position,
        estimated_time_minutes: state.config.delay_minutes_for(receipt.position),
        phone: phone_number,
        command_id,
    }))
}
