use std::sync::Arc;

use motoextra_realtime::api;
use motoextra_realtime::config::Config;
use motoextra_realtime::error::AppError;
use motoextra_realtime::notify::{LogNotifier, Notifier, WebhookNotifier};
use motoextra_realtime::state::AppState;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false)
        .compact()
        .init();

    let notifier: Arc<dyn Notifier> = match &config.push_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "push notifications go to webhook");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let state = Arc::new(AppState::new(
        config.event_buffer_size,
        config.timing,
        notifier,
    ));
    let app = api::rest::router(state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(
        http_port = config.http_port,
        publish_floor_ms = config.timing.publish_floor.as_millis() as u64,
        heartbeat_interval_ms = config.timing.heartbeat_interval.as_millis() as u64,
        "realtime hub started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
