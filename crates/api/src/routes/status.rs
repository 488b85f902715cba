//! Session and queue status endpoints.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;

use courier_common::types::SessionState;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route("/qr", get(qr))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub whatsapp_connected: bool,
    pub queue_size: usize,
    pub is_processing: bool,
    pub has_qr: bool,
    pub state: SessionState,
    pub message_delay_ms: u64,
}

/// GET /status: Session readiness and queue depth.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let snapshot = state.session().snapshot();

    Json(StatusResponse {
        whatsapp_connected: snapshot.state == SessionState::Ready,
        queue_size: state.dispatcher.queue_len(),
        is_processing: state.dispatcher.is_processing(),
        has_qr: snapshot.challenge.is_some(),
        state: snapshot.state,
        message_delay_ms: state.config.message_delay_ms,
    })
}

/// GET /qr: Pending login challenge, or a connection marker.
async fn qr(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.session().snapshot();

    match (snapshot.state, snapshot.challenge) {
        (SessionState::AwaitingScan, Some(challenge)) => Json(json!({ "qr": challenge })),
        (SessionState::Ready, _) => Json(json!({ "status": "connected" })),
        _ => Json(json!({ "status": "initializing" })),
    }
}
