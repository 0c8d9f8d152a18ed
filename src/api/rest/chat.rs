use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::chat::{
    MAX_MESSAGE_CHARS, insert_message, load_messages, mark_all_read, normalize_text, unread_counts,
};
use crate::error::AppError;
use crate::models::chat::{ChatMessage, NewChatMessage, SenderRole};
use crate::notify::PushPayload;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/shifts/:shift_id/messages",
            get(list_messages).post(post_message),
        )
        .route("/shifts/:shift_id/messages/read", post(mark_read))
        .route("/messages/unread", get(unread))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostMessageRequest {
    pub sender_id: Uuid,
    pub sender_role: SenderRole,
    pub text: String,
    /// Counterpart to notify about the new message.
    #[serde(default)]
    pub recipient_id: Option<Uuid>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub reader_id: Uuid,
}

#[derive(Serialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

#[derive(Deserialize)]
pub struct UnreadQuery {
    pub reader_id: Uuid,
    /// Comma-separated shift ids.
    pub shift_ids: String,
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(shift_id): Path<Uuid>,
) -> Result<Json<Vec<ChatMessage>>, AppError> {
    Ok(Json(load_messages(state.backend.as_ref(), shift_id).await?))
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    Path(shift_id): Path<Uuid>,
    Json(payload): Json<PostMessageRequest>,
) -> Result<Json<ChatMessage>, AppError> {
    let text = normalize_text(&payload.text).ok_or_else(|| {
        AppError::BadRequest(format!(
            "text must be between 1 and {MAX_MESSAGE_CHARS} characters"
        ))
    })?;

    let message = insert_message(
        state.backend.as_ref(),
        NewChatMessage {
            shift_id,
            sender_id: payload.sender_id,
            sender_role: payload.sender_role,
            text: text.to_string(),
        },
    )
    .await?;

    state.metrics.chat_messages_total.inc();

    if let Some(recipient) = payload.recipient_id {
        state
            .notifier
            .notify(recipient, PushPayload::new_chat_message(shift_id, &message.text));
        state
            .metrics
            .notifications_total
            .with_label_values(&["chat_message"])
            .inc();
    }

    Ok(Json(message))
}

async fn mark_read(
    State(state): State<Arc<AppState>>,
    Path(shift_id): Path<Uuid>,
    Json(payload): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, AppError> {
    let updated = mark_all_read(state.backend.as_ref(), shift_id, payload.reader_id).await?;
    state.metrics.chat_reads_total.inc_by(updated.len() as u64);

    Ok(Json(MarkReadResponse {
        updated: updated.len(),
    }))
}

async fn unread(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnreadQuery>,
) -> Result<Json<HashMap<Uuid, usize>>, AppError> {
    let shift_ids = query
        .shift_ids
        .split(',')
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .map(|raw| {
            Uuid::parse_str(raw)
                .map_err(|err| AppError::BadRequest(format!("invalid shift id {raw}: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let counts = unread_counts(state.backend.as_ref(), &shift_ids, query.reader_id).await?;
    Ok(Json(counts))
}
