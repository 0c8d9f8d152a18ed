use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, put};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::engine::tracking::{get_current_position, get_route_history};
use crate::error::AppError;
use crate::models::location::{LocationSample, RouteHistoryPoint};
use crate::realtime::{RealtimeBackend, RowKey, Table};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/shifts/:shift_id/location",
            put(publish_location).get(current_location),
        )
        .route(
            "/shifts/:shift_id/location/:rider_id",
            delete(remove_location),
        )
        .route("/shifts/:shift_id/route", get(route_history))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishLocationRequest {
    pub rider_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    #[serde(default)]
    pub captured_at: Option<DateTime<Utc>>,
}

async fn publish_location(
    State(state): State<Arc<AppState>>,
    Path(shift_id): Path<Uuid>,
    Json(payload): Json<PublishLocationRequest>,
) -> Result<Json<LocationSample>, AppError> {
    let sample = LocationSample {
        shift_id,
        rider_id: payload.rider_id,
        lat: payload.lat,
        lng: payload.lng,
        accuracy: payload.accuracy,
        captured_at: payload.captured_at.unwrap_or_else(Utc::now),
    };

    if !sample.is_valid() {
        return Err(AppError::BadRequest(
            "lat must be within [-90, 90], lng within [-180, 180], accuracy >= 0".to_string(),
        ));
    }

    let row = serde_json::to_value(&sample)
        .map_err(|err| AppError::Internal(format!("failed to encode location: {err}")))?;

    let result = state
        .backend
        .upsert_by_key(Table::LocationSamples, &LocationSample::KEY_COLUMNS, row)
        .await;

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .location_publishes_total
        .with_label_values(&[outcome])
        .inc();

    result?;
    Ok(Json(sample))
}

async fn remove_location(
    State(state): State<Arc<AppState>>,
    Path((shift_id, rider_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    let key = RowKey::new()
        .with("riderId", rider_id)
        .with("shiftId", shift_id);

    let result = state.backend.delete_by_key(Table::LocationSamples, key).await;

    let outcome = if result.is_ok() { "success" } else { "error" };
    state
        .metrics
        .location_deletes_total
        .with_label_values(&[outcome])
        .inc();

    if let Err(err) = &result {
        warn!(shift_id = %shift_id, rider_id = %rider_id, error = %err, "location delete failed");
    }
    result?;
    Ok(StatusCode::NO_CONTENT)
}

async fn current_location(
    State(state): State<Arc<AppState>>,
    Path(shift_id): Path<Uuid>,
) -> Result<Json<LocationSample>, AppError> {
    get_current_position(state.backend.as_ref(), shift_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no live location for shift {shift_id}")))
}

async fn route_history(
    State(state): State<Arc<AppState>>,
    Path(shift_id): Path<Uuid>,
) -> Json<Vec<RouteHistoryPoint>> {
    Json(get_route_history(state.backend.as_ref(), shift_id).await)
}
