//! Publish decisions for one rider on one shift.
//!
//! Pure state: callers pass the current instant and act on the returned
//! decision, which keeps the timing rules testable without a runtime.

use std::time::Duration;

use tokio::time::Instant;

use crate::engine::gate::RateGate;
use crate::geo::source::GeoFix;

#[derive(Debug, Clone)]
pub struct ThrottleState {
    is_active: bool,
    gate: RateGate,
    latest: Option<GeoFix>,
}

impl ThrottleState {
    pub fn new(publish_floor: Duration) -> Self {
        Self {
            is_active: false,
            gate: RateGate::new(publish_floor),
            latest: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn latest(&self) -> Option<&GeoFix> {
        self.latest.as_ref()
    }

    pub fn last_publish_at(&self) -> Option<Instant> {
        self.gate.last_admitted()
    }

    /// Starts a new cycle. Returns the fix to publish straight away, if one
    /// is known. Activating an active unit does nothing.
    pub fn activate(&mut self, now: Instant) -> Option<GeoFix> {
        if self.is_active {
            return None;
        }
        self.is_active = true;
        // The previous cycle's row is gone, so the first publish recreates it.
        self.gate.reset();
        self.admit(now)
    }

    pub fn on_sample(&mut self, fix: GeoFix, now: Instant) -> Option<GeoFix> {
        self.latest = Some(fix);
        self.admit(now)
    }

    /// Heartbeat tick: republishes the latest fix when the floor allows.
    pub fn on_heartbeat(&mut self, now: Instant) -> Option<GeoFix> {
        self.admit(now)
    }

    /// Ends the cycle. Returns `true` exactly once per cycle: the caller
    /// must then delete the live row.
    pub fn deactivate(&mut self) -> bool {
        std::mem::replace(&mut self.is_active, false)
    }

    fn admit(&mut self, now: Instant) -> Option<GeoFix> {
        if !self.is_active {
            return None;
        }
        let fix = self.latest?;
        self.gate.try_admit(now).then_some(fix)
    }
}
