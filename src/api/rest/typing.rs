use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::routing::post;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::typing::send_typing_signal;
use crate::error::AppError;
use crate::models::typing::TypingSignal;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/shifts/:shift_id/typing", post(relay_typing))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    pub sender_id: Uuid,
}

/// Relays without throttling; senders throttle themselves.
async fn relay_typing(
    State(state): State<Arc<AppState>>,
    Path(shift_id): Path<Uuid>,
    Json(payload): Json<TypingRequest>,
) -> Result<Json<TypingSignal>, AppError> {
    let signal = send_typing_signal(state.backend.as_ref(), shift_id, payload.sender_id).await?;
    state.metrics.typing_signals_total.inc();
    Ok(Json(signal))
}
