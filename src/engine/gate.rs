use std::time::Duration;

use tokio::time::Instant;

/// Minimum-interval gate. An attempt is admitted only when `floor` has
/// elapsed since the last admitted one; attempts inside the window are
/// dropped, never queued.
#[derive(Debug, Clone)]
pub struct RateGate {
    floor: Duration,
    last_admitted: Option<Instant>,
}

impl RateGate {
    pub fn new(floor: Duration) -> Self {
        Self {
            floor,
            last_admitted: None,
        }
    }

    pub fn is_open(&self, now: Instant) -> bool {
        self.last_admitted
            .is_none_or(|last| now.saturating_duration_since(last) >= self.floor)
    }

    /// Admits the attempt and records `now` when the gate is open.
    pub fn try_admit(&mut self, now: Instant) -> bool {
        if !self.is_open(now) {
            return false;
        }
        self.last_admitted = Some(now);
        true
    }

    pub fn last_admitted(&self) -> Option<Instant> {
        self.last_admitted
    }

    pub fn reset(&mut self) {
        self.last_admitted = None;
    }
}
