//! Live location broadcasting for one rider on one shift.
//!
//! A [`LocationBroadcaster`] owns a background task that consumes the
//! geolocation watch and the shift's activity flag, and upserts the rider's
//! live row through the realtime backend while the shift is in transit. On
//! deactivation, or when the handle goes away while active, the row is
//! deleted.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::TimingConfig;
use crate::engine::throttle::ThrottleState;
use crate::error::{BackendError, GeolocationError};
use crate::geo::source::{GeoEvent, GeoFix, GeolocationSource, GeolocationWatch, PositionProvider};
use crate::models::location::LocationSample;
use crate::models::shift::ShiftStatus;
use crate::realtime::{RealtimeBackend, RowKey, Table};

/// What the rider's UI shows about GPS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "snake_case")]
pub enum GpsStatus {
    Acquiring,
    Live,
    Unavailable(GeolocationError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastIdentity {
    pub rider_id: Uuid,
    pub shift_id: Uuid,
}

#[derive(Debug)]
enum Command {
    SetActive(bool),
    RetryGps,
}

pub struct LocationBroadcaster {
    identity: BroadcastIdentity,
    commands: mpsc::UnboundedSender<Command>,
    gps_status: watch::Receiver<GpsStatus>,
    task: JoinHandle<()>,
}

impl LocationBroadcaster {
    /// Starts watching GPS for the rider. Nothing is published until the
    /// unit is activated.
    pub fn spawn<B, P>(
        backend: Arc<B>,
        source: GeolocationSource<P>,
        identity: BroadcastIdentity,
        timing: TimingConfig,
    ) -> Self
    where
        B: RealtimeBackend,
        P: PositionProvider,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(GpsStatus::Acquiring);

        let unit = BroadcastUnit {
            backend,
            identity,
            timing,
            throttle: ThrottleState::new(timing.publish_floor),
            heartbeat: None,
            publishes: JoinSet::new(),
            deletes: JoinSet::new(),
            deferred: None,
            status: status_tx,
        };
        let task = tokio::spawn(unit.run(source, commands_rx));

        Self {
            identity,
            commands: commands_tx,
            gps_status: status_rx,
            task,
        }
    }

    pub fn identity(&self) -> BroadcastIdentity {
        self.identity
    }

    pub fn set_active(&self, active: bool) {
        self.send(Command::SetActive(active));
    }

    pub fn set_shift_status(&self, status: ShiftStatus) {
        self.set_active(status.broadcasts_location());
    }

    /// Restarts the GPS watch after it failed.
    pub fn retry_gps(&self) {
        self.send(Command::RetryGps);
    }

    pub fn gps_status(&self) -> watch::Receiver<GpsStatus> {
        self.gps_status.clone()
    }

    /// Stops the unit and waits for its cleanup, including the delete of the
    /// live row when it was active.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        drop(commands);
        if let Err(err) = task.await {
            warn!(error = %err, "location broadcaster task failed");
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(shift_id = %self.identity.shift_id, "location broadcaster already stopped");
        }
    }
}

/// Convenience for the common case: spawn the unit and derive its activity
/// from the shift's current status.
pub fn start_broadcasting<B, P>(
    backend: Arc<B>,
    source: GeolocationSource<P>,
    rider_id: Uuid,
    shift_id: Uuid,
    status: ShiftStatus,
    timing: TimingConfig,
) -> LocationBroadcaster
where
    B: RealtimeBackend,
    P: PositionProvider,
{
    let broadcaster = LocationBroadcaster::spawn(
        backend,
        source,
        BroadcastIdentity { rider_id, shift_id },
        timing,
    );
    broadcaster.set_shift_status(status);
    broadcaster
}

struct BroadcastUnit<B> {
    backend: Arc<B>,
    identity: BroadcastIdentity,
    timing: TimingConfig,
    throttle: ThrottleState,
    heartbeat: Option<Interval>,
    publishes: JoinSet<()>,
    deletes: JoinSet<()>,
    /// Publish held back until the previous cycle's delete has landed.
    deferred: Option<GeoFix>,
    status: watch::Sender<GpsStatus>,
}

impl<B: RealtimeBackend> BroadcastUnit<B> {
    async fn run<P: PositionProvider>(
        mut self,
        source: GeolocationSource<P>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut gps = Some(source.watch());

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(Command::SetActive(true)) => self.activate(),
                    Some(Command::SetActive(false)) => self.deactivate(),
                    Some(Command::RetryGps) => {
                        if let Some(mut stale) = gps.replace(source.watch()) {
                            stale.release();
                        }
                        self.status.send_replace(GpsStatus::Acquiring);
                    }
                    None => break,
                },

                event = next_gps_event(&mut gps) => match event {
                    Some(GeoEvent::Fix(fix)) => self.on_fix(fix),
                    Some(GeoEvent::Error(err)) => {
                        self.status.send_replace(GpsStatus::Unavailable(err));
                        release(&mut gps);
                    }
                    None => release(&mut gps),
                },

                _ = next_tick(&mut self.heartbeat) => self.on_heartbeat(),

                Some(result) = self.publishes.join_next(), if !self.publishes.is_empty() => {
                    log_join_failure(result);
                }

                Some(result) = self.deletes.join_next(), if !self.deletes.is_empty() => {
                    log_join_failure(result);
                    self.release_deferred();
                }
            }
        }

        release(&mut gps);
        self.teardown().await;
    }

    fn activate(&mut self) {
        if self.throttle.is_active() {
            return;
        }

        let now = Instant::now();
        let publish = self.throttle.activate(now);

        let period = self.timing.heartbeat_interval;
        let mut heartbeat = interval_at(now + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.heartbeat = Some(heartbeat);

        info!(
            rider_id = %self.identity.rider_id,
            shift_id = %self.identity.shift_id,
            "location broadcasting activated"
        );

        if let Some(fix) = publish {
            self.publish(fix);
        }
    }

    fn deactivate(&mut self) {
        self.heartbeat = None;
        if !self.throttle.deactivate() {
            return;
        }
        self.deferred = None;

        // Upserts that have not reached the backend yet must not resurrect
        // the row after the delete.
        self.publishes.abort_all();

        info!(
            rider_id = %self.identity.rider_id,
            shift_id = %self.identity.shift_id,
            "location broadcasting deactivated"
        );

        let backend = self.backend.clone();
        let identity = self.identity;
        self.deletes.spawn(async move {
            delete_live_row(backend.as_ref(), identity).await;
        });
    }

    fn on_fix(&mut self, fix: GeoFix) {
        self.status.send_if_modified(|status| {
            let changed = *status != GpsStatus::Live;
            *status = GpsStatus::Live;
            changed
        });

        if let Some(fix) = self.throttle.on_sample(fix, Instant::now()) {
            self.publish(fix);
        }
    }

    fn on_heartbeat(&mut self) {
        if !self.throttle.is_active() {
            self.heartbeat = None;
            return;
        }
        if let Some(fix) = self.throttle.on_heartbeat(Instant::now()) {
            debug!(shift_id = %self.identity.shift_id, "heartbeat publish");
            self.publish(fix);
        }
    }

    fn publish(&mut self, fix: GeoFix) {
        if !self.deletes.is_empty() {
            debug!(shift_id = %self.identity.shift_id, "publish waits for pending delete");
            self.deferred = Some(fix);
            return;
        }

        let sample = LocationSample {
            shift_id: self.identity.shift_id,
            rider_id: self.identity.rider_id,
            lat: fix.latitude,
            lng: fix.longitude,
            accuracy: fix.accuracy,
            captured_at: fix.captured_at,
        };

        let backend = self.backend.clone();
        self.publishes.spawn(async move {
            if let Err(err) = upsert_live_row(backend.as_ref(), &sample).await {
                warn!(
                    shift_id = %sample.shift_id,
                    error = %err,
                    "location publish failed"
                );
            }
        });
    }

    fn release_deferred(&mut self) {
        if !self.deletes.is_empty() {
            return;
        }
        if let Some(deferred) = self.deferred.take() {
            if self.throttle.is_active() {
                let fix = self.throttle.latest().copied().unwrap_or(deferred);
                self.publish(fix);
            }
        }
    }

    async fn teardown(mut self) {
        self.heartbeat = None;
        self.deferred = None;

        if self.throttle.deactivate() {
            self.publishes.abort_all();
            delete_live_row(self.backend.as_ref(), self.identity).await;
        }

        while let Some(result) = self.publishes.join_next().await {
            log_join_failure(result);
        }
        while let Some(result) = self.deletes.join_next().await {
            log_join_failure(result);
        }
        debug!(shift_id = %self.identity.shift_id, "location broadcaster stopped");
    }
}

async fn upsert_live_row<B: RealtimeBackend + ?Sized>(
    backend: &B,
    sample: &LocationSample,
) -> Result<(), BackendError> {
    let row = serde_json::to_value(sample)
        .map_err(|err| BackendError::Malformed(format!("location sample: {err}")))?;
    backend
        .upsert_by_key(Table::LocationSamples, &LocationSample::KEY_COLUMNS, row)
        .await?;
    Ok(())
}

async fn delete_live_row<B: RealtimeBackend + ?Sized>(backend: &B, identity: BroadcastIdentity) {
    let key = RowKey::new()
        .with("riderId", identity.rider_id)
        .with("shiftId", identity.shift_id);

    if let Err(err) = backend.delete_by_key(Table::LocationSamples, key).await {
        warn!(
            shift_id = %identity.shift_id,
            error = %err,
            "failed to delete live location"
        );
    }
}

fn log_join_failure(result: Result<(), JoinError>) {
    if let Err(err) = result {
        if !err.is_cancelled() {
            warn!(error = %err, "location write task failed");
        }
    }
}

fn release(gps: &mut Option<GeolocationWatch>) {
    if let Some(mut watch) = gps.take() {
        watch.release();
    }
}

async fn next_gps_event(gps: &mut Option<GeolocationWatch>) -> Option<GeoEvent> {
    match gps {
        Some(watch) => watch.next().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
