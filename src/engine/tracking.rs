//! Restaurant-side view of a rider in transit.
//!
//! [`MapView`] is the render state of the map for one shift: it starts out
//! waiting for GPS, switches to live on the first position and stays there.
//! [`LocationConsumer`] feeds it from the realtime backend.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::geo::{Bounds, route_distance_km};
use crate::models::location::{GeoPoint, LocationSample, RouteHistoryPoint};
use crate::realtime::{
    ChannelEvent, ChannelKind, ChannelName, Filter, RealtimeBackend, Subscription, Table,
    parse_row, parse_rows,
};

pub const RESTAURANT_ZOOM: f64 = 15.0;
pub const RIDER_ZOOM: f64 = 16.0;
pub const FIT_PADDING_PX: u32 = 50;

#[derive(Debug, Clone, PartialEq)]
pub enum MapState {
    NoMotoboyLocation,
    Live { rider: LocationSample },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Viewport {
    Center { center: GeoPoint, zoom: f64 },
    Fit { bounds: Bounds, padding_px: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapUpdate {
    /// First position: the view switched from waiting to live.
    WentLive,
    /// Only the rider marker moved.
    MarkerMoved,
    /// Older than what is on screen, or for another shift.
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiderMarker {
    pub position: GeoPoint,
    pub accuracy: f64,
    pub pulsing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapScene {
    pub restaurant: GeoPoint,
    pub waiting_for_gps: bool,
    pub rider: Option<RiderMarker>,
    /// Straight dashed line rider -> restaurant.
    pub dashed_link: Option<[GeoPoint; 2]>,
    /// Historical trail plus the current position.
    pub trail: Vec<GeoPoint>,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct MapView {
    shift_id: Uuid,
    restaurant: GeoPoint,
    state: MapState,
    route: Vec<RouteHistoryPoint>,
    viewport: Option<Viewport>,
    last_update: Option<Instant>,
}

impl MapView {
    pub fn new(shift_id: Uuid, restaurant: GeoPoint) -> Self {
        Self {
            shift_id,
            restaurant,
            state: MapState::NoMotoboyLocation,
            route: Vec::new(),
            viewport: None,
            last_update: None,
        }
    }

    /// Initial render: fit rider and restaurant when the rider position is
    /// known, otherwise center on the restaurant.
    pub fn mount(
        &mut self,
        current: Option<LocationSample>,
        route: Vec<RouteHistoryPoint>,
        now: Instant,
    ) -> Viewport {
        self.set_route(route);

        if let Some(sample) = current.filter(|sample| sample.shift_id == self.shift_id) {
            self.state = MapState::Live { rider: sample };
            self.last_update = Some(now);
        }

        let viewport = match &self.state {
            MapState::Live { rider } => {
                let points = [rider.position(), self.restaurant];
                match Bounds::around(&points) {
                    Some(bounds) => Viewport::Fit {
                        bounds,
                        padding_px: FIT_PADDING_PX,
                    },
                    None => self.restaurant_viewport(),
                }
            }
            MapState::NoMotoboyLocation => self.restaurant_viewport(),
        };

        self.viewport = Some(viewport);
        viewport
    }

    /// Applies a live position. Never refits the viewport.
    pub fn apply_position(&mut self, sample: LocationSample, now: Instant) -> MapUpdate {
        if sample.shift_id != self.shift_id || !sample.is_valid() {
            return MapUpdate::Ignored;
        }

        let update = match &self.state {
            MapState::NoMotoboyLocation => MapUpdate::WentLive,
            MapState::Live { rider } if sample.captured_at < rider.captured_at => {
                return MapUpdate::Ignored;
            }
            MapState::Live { .. } => MapUpdate::MarkerMoved,
        };

        self.state = MapState::Live { rider: sample };
        self.last_update = Some(now);
        update
    }

    pub fn set_route(&mut self, mut route: Vec<RouteHistoryPoint>) {
        route.sort_by_key(|point| point.recorded_at);
        self.route = route;
    }

    pub fn push_route_point(&mut self, point: RouteHistoryPoint) {
        let at = self
            .route
            .partition_point(|existing| existing.recorded_at <= point.recorded_at);
        self.route.insert(at, point);
    }

    /// Recenters on the last known rider position; `None` (and no change)
    /// while there is none.
    pub fn center_on_rider(&mut self) -> Option<Viewport> {
        let MapState::Live { rider } = &self.state else {
            return None;
        };

        let viewport = Viewport::Center {
            center: rider.position(),
            zoom: RIDER_ZOOM,
        };
        self.viewport = Some(viewport);
        Some(viewport)
    }

    pub fn state(&self) -> &MapState {
        &self.state
    }

    pub fn rider(&self) -> Option<&LocationSample> {
        match &self.state {
            MapState::Live { rider } => Some(rider),
            MapState::NoMotoboyLocation => None,
        }
    }

    pub fn viewport(&self) -> Option<&Viewport> {
        self.viewport.as_ref()
    }

    pub fn last_update_age(&self, now: Instant) -> Option<Duration> {
        self.last_update
            .map(|at| now.saturating_duration_since(at))
    }

    /// Trail polyline; drawn only when the history has more than one point.
    pub fn trail(&self) -> Vec<GeoPoint> {
        let Some(rider) = self.rider() else {
            return Vec::new();
        };
        if self.route.len() <= 1 {
            return Vec::new();
        }

        self.route
            .iter()
            .map(RouteHistoryPoint::position)
            .chain(std::iter::once(rider.position()))
            .collect()
    }

    pub fn distance_km(&self) -> Option<f64> {
        let trail = self.trail();
        (!trail.is_empty()).then(|| route_distance_km(&trail))
    }

    pub fn scene(&self) -> MapScene {
        let rider = self.rider().map(|rider| RiderMarker {
            position: rider.position(),
            accuracy: rider.accuracy,
            pulsing: true,
        });
        let trail = self.trail();
        let distance_km = (!trail.is_empty()).then(|| route_distance_km(&trail));

        MapScene {
            restaurant: self.restaurant,
            waiting_for_gps: rider.is_none(),
            dashed_link: rider
                .as_ref()
                .map(|marker| [marker.position, self.restaurant]),
            rider,
            trail,
            distance_km,
        }
    }

    fn restaurant_viewport(&self) -> Viewport {
        Viewport::Center {
            center: self.restaurant,
            zoom: RESTAURANT_ZOOM,
        }
    }
}

/// Latest live position published for the shift, if any.
pub async fn get_current_position<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
) -> Option<LocationSample> {
    let filter = Filter::new().eq("shiftId", shift_id);
    match backend.select(Table::LocationSamples, filter).await {
        Ok(rows) => parse_rows::<LocationSample>(Table::LocationSamples, &rows)
            .into_iter()
            .filter(LocationSample::is_valid)
            .max_by_key(|sample| sample.captured_at),
        Err(err) => {
            warn!(shift_id = %shift_id, error = %err, "failed to fetch live location");
            None
        }
    }
}

pub async fn get_route_history<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
) -> Vec<RouteHistoryPoint> {
    let filter = Filter::new().eq("shiftId", shift_id).order_by("recordedAt");
    match backend.select(Table::RouteHistory, filter).await {
        Ok(rows) => parse_rows(Table::RouteHistory, &rows),
        Err(err) => {
            warn!(shift_id = %shift_id, error = %err, "failed to fetch route history");
            Vec::new()
        }
    }
}

/// Live feed of one shift's rider position into a [`MapView`]. The channel
/// subscription is owned by the consumer and released on [`close`] or drop.
///
/// [`close`]: LocationConsumer::close
pub struct LocationConsumer<B> {
    backend: Arc<B>,
    shift_id: Uuid,
    view: MapView,
    subscription: Option<Subscription>,
}

impl<B: RealtimeBackend> LocationConsumer<B> {
    pub async fn open(backend: Arc<B>, shift_id: Uuid, restaurant: GeoPoint) -> Self {
        let channel = ChannelName::for_shift(ChannelKind::Location, shift_id);
        // Subscribe before the snapshot so nothing published in between is lost.
        let subscription = match backend.subscribe(&channel, Filter::new().eq("shiftId", shift_id))
        {
            Ok(subscription) => Some(subscription),
            Err(err) => {
                warn!(channel = %channel, error = %err, "location feed unavailable");
                None
            }
        };

        let current = get_current_position(backend.as_ref(), shift_id).await;
        let route = get_route_history(backend.as_ref(), shift_id).await;

        let mut view = MapView::new(shift_id, restaurant);
        view.mount(current, route, Instant::now());

        Self {
            backend,
            shift_id,
            view,
            subscription,
        }
    }

    pub fn view(&self) -> &MapView {
        &self.view
    }

    pub fn center_on_rider(&mut self) -> Option<Viewport> {
        self.view.center_on_rider()
    }

    pub fn is_live(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(Subscription::is_active)
    }

    /// Waits for the next position-bearing event and applies it. Returns
    /// `None` once the feed is gone; the view keeps its last state.
    pub async fn next_update(&mut self) -> Option<MapUpdate> {
        loop {
            let event = self.subscription.as_mut()?.next().await;
            let Some(event) = event else {
                self.subscription = None;
                return None;
            };
            if let Some(update) = self.apply_event(event) {
                return Some(update);
            }
        }
    }

    /// Re-reads the snapshot, e.g. after the feed dropped.
    pub async fn refresh(&mut self) -> Option<MapUpdate> {
        let route = get_route_history(self.backend.as_ref(), self.shift_id).await;
        self.view.set_route(route);

        let current = get_current_position(self.backend.as_ref(), self.shift_id).await?;
        Some(self.view.apply_position(current, Instant::now()))
    }

    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn apply_event(&mut self, event: ChannelEvent) -> Option<MapUpdate> {
        match event {
            ChannelEvent::Insert {
                table: Table::LocationSamples,
                row,
            }
            | ChannelEvent::Update {
                table: Table::LocationSamples,
                row,
            } => {
                let sample = parse_row::<LocationSample>(Table::LocationSamples, &row)?;
                Some(self.view.apply_position(sample, Instant::now()))
            }
            ChannelEvent::Insert {
                table: Table::RouteHistory,
                row,
            } => {
                let point = parse_row::<RouteHistoryPoint>(Table::RouteHistory, &row)?;
                self.view.push_route_point(point);
                None
            }
            ChannelEvent::Delete {
                table: Table::LocationSamples,
                ..
            } => {
                debug!(shift_id = %self.shift_id, "rider stopped broadcasting; keeping last position");
                None
            }
            _ => None,
        }
    }
}
