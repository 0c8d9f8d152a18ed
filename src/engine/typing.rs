//! "Is typing" presence for the two parties of a shift chat.
//!
//! The sending side drops signals that come faster than the throttle window.
//! The receiving side shows the counterpart as typing until no signal has
//! arrived for the timeout, restarting a single timer on every signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TimingConfig;
use crate::engine::gate::RateGate;
use crate::error::BackendError;
use crate::models::typing::TypingSignal;
use crate::realtime::{ChannelEvent, ChannelKind, ChannelName, Filter, RealtimeBackend, Subscription};

pub const TYPING_EVENT: &str = "typing";

/// Broadcasts one typing signal on the shift's typing channel.
pub async fn send_typing_signal<B: RealtimeBackend + ?Sized>(
    backend: &B,
    shift_id: Uuid,
    sender_id: Uuid,
) -> Result<TypingSignal, BackendError> {
    let signal = TypingSignal {
        shift_id,
        sender_id,
        sent_at: Utc::now(),
    };
    let payload = serde_json::to_value(signal)
        .map_err(|err| BackendError::Malformed(format!("typing signal: {err}")))?;

    let channel = ChannelName::for_shift(ChannelKind::Typing, shift_id);
    backend.broadcast(&channel, TYPING_EVENT, payload).await?;
    Ok(signal)
}

pub struct TypingSender<B> {
    backend: Arc<B>,
    shift_id: Uuid,
    sender_id: Uuid,
    gate: RateGate,
}

impl<B: RealtimeBackend> TypingSender<B> {
    pub fn new(backend: Arc<B>, shift_id: Uuid, sender_id: Uuid, timing: &TimingConfig) -> Self {
        Self {
            backend,
            shift_id,
            sender_id,
            gate: RateGate::new(timing.typing_throttle),
        }
    }

    /// Call on every keystroke. Returns whether a signal went out.
    pub fn broadcast_typing(&mut self) -> bool {
        if !self.gate.try_admit(Instant::now()) {
            return false;
        }

        let backend = self.backend.clone();
        let (shift_id, sender_id) = (self.shift_id, self.sender_id);
        tokio::spawn(async move {
            if let Err(err) = send_typing_signal(backend.as_ref(), shift_id, sender_id).await {
                warn!(shift_id = %shift_id, error = %err, "typing signal failed");
            }
        });
        true
    }
}

#[derive(Debug, Clone)]
pub struct TypingTracker {
    self_id: Uuid,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl TypingTracker {
    pub fn new(self_id: Uuid, timeout: Duration) -> Self {
        Self {
            self_id,
            timeout,
            deadline: None,
        }
    }

    /// Records a signal from the counterpart. Own signals are ignored.
    pub fn on_signal(&mut self, signal: &TypingSignal, now: Instant) -> bool {
        if signal.sender_id == self.self_id {
            return false;
        }
        self.deadline = Some(now + self.timeout);
        true
    }

    pub fn is_typing(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now < deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clears the flag once the deadline has passed. Returns `true` when it
    /// was cleared by this call.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Receiving side. Holds the typing-channel subscription for as long as it
/// lives.
pub struct TypingIndicator {
    state: watch::Receiver<bool>,
    task: Option<JoinHandle<()>>,
}

impl TypingIndicator {
    pub fn spawn<B: RealtimeBackend + ?Sized>(
        backend: &B,
        shift_id: Uuid,
        self_id: Uuid,
        timing: &TimingConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(false);
        let channel = ChannelName::for_shift(ChannelKind::Typing, shift_id);

        let task = match backend.subscribe(&channel, Filter::new()) {
            Ok(subscription) => {
                let tracker = TypingTracker::new(self_id, timing.typing_timeout);
                Some(tokio::spawn(run_indicator(subscription, tracker, shift_id, state_tx)))
            }
            Err(err) => {
                warn!(channel = %channel, error = %err, "typing presence unavailable");
                None
            }
        };

        Self {
            state: state_rx,
            task,
        }
    }

    pub fn is_typing(&self) -> bool {
        *self.state.borrow()
    }

    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.clone()
    }

    pub fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_indicator(
    mut subscription: Subscription,
    mut tracker: TypingTracker,
    shift_id: Uuid,
    state: watch::Sender<bool>,
) {
    loop {
        let deadline = tracker.deadline();

        tokio::select! {
            event = subscription.next() => match event {
                Some(ChannelEvent::Broadcast { event, payload }) if event == TYPING_EVENT => {
                    let Some(signal) = parse_signal(payload) else {
                        continue;
                    };
                    if signal.shift_id != shift_id {
                        continue;
                    }
                    if tracker.on_signal(&signal, Instant::now()) {
                        state.send_if_modified(|typing| !std::mem::replace(typing, true));
                    }
                }
                Some(_) => {}
                None => break,
            },

            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if tracker.expire(Instant::now()) {
                    state.send_replace(false);
                }
            }
        }
    }

    debug!(shift_id = %shift_id, "typing channel closed");
    state.send_replace(false);
}

fn parse_signal(payload: Value) -> Option<TypingSignal> {
    match serde_json::from_value(payload) {
        Ok(signal) => Some(signal),
        Err(err) => {
            warn!(error = %err, "ignoring malformed typing signal");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::time::Instant;
    use uuid::Uuid;

    use super::TypingTracker;
    use crate::models::typing::TypingSignal;

    const ME: Uuid = Uuid::from_u128(1);
    const THEM: Uuid = Uuid::from_u128(2);
    const TIMEOUT: Duration = Duration::from_millis(2_000);

    fn signal_from(sender_id: Uuid) -> TypingSignal {
        TypingSignal {
            shift_id: Uuid::from_u128(3),
            sender_id,
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn own_signals_are_ignored() {
        let now = Instant::now();
        let mut tracker = TypingTracker::new(ME, TIMEOUT);

        assert!(!tracker.on_signal(&signal_from(ME), now));
        assert!(!tracker.is_typing(now));
    }

    #[test]
    fn clears_after_timeout_without_signals() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(ME, TIMEOUT);

        tracker.on_signal(&signal_from(THEM), t0);
        assert!(tracker.is_typing(t0 + Duration::from_millis(1_999)));
        assert!(!tracker.expire(t0 + Duration::from_millis(1_999)));
        assert!(tracker.expire(t0 + TIMEOUT));
        assert!(!tracker.is_typing(t0 + TIMEOUT));
    }

    #[test]
    fn new_signal_restarts_the_clock() {
        let t0 = Instant::now();
        let mut tracker = TypingTracker::new(ME, TIMEOUT);

        tracker.on_signal(&signal_from(THEM), t0);
        tracker.on_signal(&signal_from(THEM), t0 + Duration::from_millis(1_500));

        assert!(!tracker.expire(t0 + TIMEOUT));
        assert!(tracker.is_typing(t0 + Duration::from_millis(3_000)));
        assert_eq!(tracker.deadline(), Some(t0 + Duration::from_millis(3_500)));
    }
}
