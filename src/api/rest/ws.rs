use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::AppError;
use crate::realtime::{ChannelName, Filter, RealtimeBackend, Subscription};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsParams {
    pub channel: String,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
) -> Result<impl IntoResponse, AppError> {
    let channel = ChannelName::parse(&params.channel)
        .ok_or_else(|| AppError::BadRequest(format!("unknown channel {}", params.channel)))?;
    let subscription = state.backend.subscribe(&channel, Filter::new())?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, subscription)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, mut subscription: Subscription) {
    let (mut sender, mut receiver) = socket.split();
    let channel = subscription.channel().clone();

    state.metrics.active_ws_subscriptions.inc();
    info!(channel = %channel, "websocket client subscribed");

    let send_task = tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize channel event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.metrics.active_ws_subscriptions.dec();
    info!(channel = %channel, "websocket client disconnected");
}
