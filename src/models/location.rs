use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Live position of a rider on a shift. At most one row exists per
/// (rider, shift); it is upserted on publish and deleted on deactivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub shift_id: Uuid,
    pub rider_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    /// Accuracy radius in meters.
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    pub const KEY_COLUMNS: [&'static str; 2] = ["riderId", "shiftId"];

    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    pub fn is_valid(&self) -> bool {
        self.position().is_valid() && self.accuracy.is_finite() && self.accuracy >= 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteHistoryPoint {
    pub lat: f64,
    pub lng: f64,
    pub recorded_at: DateTime<Utc>,
}

impl RouteHistoryPoint {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}
