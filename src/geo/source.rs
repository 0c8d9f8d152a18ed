//! Geolocation source.
//!
//! Wraps a platform position API behind [`PositionProvider`] and turns it
//! into a watch: a fresh fix is requested immediately, stale readings are
//! discarded in favour of a new request, and a reading that takes longer
//! than the configured timeout ends the watch with an error.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::config::TimingConfig;
use crate::error::GeolocationError;
use crate::models::location::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl GeoFix {
    pub fn position(&self) -> GeoPoint {
        GeoPoint::new(self.latitude, self.longitude)
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.captured_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeoEvent {
    Fix(GeoFix),
    Error(GeolocationError),
}

#[async_trait]
pub trait PositionProvider: Send + Sync + 'static {
    /// Resolves with the next reading. When `fresh` is set the provider
    /// must not hand back a cached reading.
    async fn next_position(&self, fresh: bool) -> Result<GeoFix, GeolocationError>;
}

pub struct GeolocationSource<P> {
    provider: Arc<P>,
    max_age: Duration,
    timeout: Duration,
}

impl<P> Clone for GeolocationSource<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            max_age: self.max_age,
            timeout: self.timeout,
        }
    }
}

impl<P: PositionProvider> GeolocationSource<P> {
    pub fn new(provider: Arc<P>, timing: &TimingConfig) -> Self {
        Self {
            provider,
            max_age: timing.gps_max_age,
            timeout: timing.gps_timeout,
        }
    }

    pub fn watch(&self) -> GeolocationWatch {
        let (events_tx, events_rx) = mpsc::channel(16);
        let task = tokio::spawn(run_watch(
            self.provider.clone(),
            self.max_age,
            self.timeout,
            events_tx,
        ));

        GeolocationWatch {
            events: events_rx,
            task: Some(task),
        }
    }
}

async fn run_watch<P: PositionProvider>(
    provider: Arc<P>,
    max_age: Duration,
    timeout: Duration,
    events_tx: mpsc::Sender<GeoEvent>,
) {
    let mut fresh = true;
    // Stale readings do not extend the wait; only an accepted fix does.
    let mut deadline = Instant::now() + timeout;

    loop {
        let event = match timeout_at(deadline, provider.next_position(fresh)).await {
            Err(_) => GeoEvent::Error(GeolocationError::Timeout),
            Ok(Err(err)) => GeoEvent::Error(err),
            Ok(Ok(fix)) if fix.age() > max_age => {
                debug!(age_ms = fix.age().as_millis() as u64, "discarding stale position");
                fresh = true;
                continue;
            }
            Ok(Ok(fix)) => {
                fresh = false;
                GeoEvent::Fix(fix)
            }
        };

        let terminal = matches!(event, GeoEvent::Error(_));
        if let GeoEvent::Error(err) = event {
            warn!(error = %err, "geolocation watch failed");
        }

        if events_tx.send(event).await.is_err() || terminal {
            break;
        }
        deadline = Instant::now() + timeout;
    }
}

/// Owned handle to a running watch. The platform watch is released when the
/// handle is released or dropped, whichever comes first.
pub struct GeolocationWatch {
    events: mpsc::Receiver<GeoEvent>,
    task: Option<JoinHandle<()>>,
}

impl GeolocationWatch {
    pub async fn next(&mut self) -> Option<GeoEvent> {
        self.events.recv().await
    }

    pub fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.events.close();
            debug!("geolocation watch released");
        }
    }

    pub fn is_released(&self) -> bool {
        self.task.is_none()
    }
}

impl Drop for GeolocationWatch {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use tokio::time::Instant;

    use super::{GeoEvent, GeoFix, GeolocationSource, PositionProvider};
    use crate::config::TimingConfig;
    use crate::error::GeolocationError;

    struct ScriptedProvider {
        script: Mutex<VecDeque<Result<GeoFix, GeolocationError>>>,
        requests: Mutex<Vec<bool>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<GeoFix, GeolocationError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl PositionProvider for ScriptedProvider {
        async fn next_position(&self, fresh: bool) -> Result<GeoFix, GeolocationError> {
            self.requests.lock().unwrap().push(fresh);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }
    }

    fn fix_aged(seconds: i64) -> GeoFix {
        GeoFix {
            latitude: -23.55,
            longitude: -46.63,
            accuracy: 8.0,
            captured_at: Utc::now() - ChronoDuration::seconds(seconds),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_request_asks_for_fresh_fix() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(fix_aged(0))]));
        let source = GeolocationSource::new(provider.clone(), &TimingConfig::default());

        let mut watch = source.watch();
        assert!(matches!(watch.next().await, Some(GeoEvent::Fix(_))));
        assert_eq!(provider.requests.lock().unwrap().first(), Some(&true));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_fix_is_dropped_and_fresh_one_requested() {
        let fresh = fix_aged(0);
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(fix_aged(0)),
            Ok(fix_aged(60)),
            Ok(fresh),
        ]));
        let source = GeolocationSource::new(provider.clone(), &TimingConfig::default());

        let mut watch = source.watch();
        assert!(matches!(watch.next().await, Some(GeoEvent::Fix(_))));
        assert_eq!(watch.next().await, Some(GeoEvent::Fix(fresh)));

        let requests = provider.requests.lock().unwrap().clone();
        assert_eq!(&requests[..3], &[true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn silent_provider_times_out() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let source = GeolocationSource::new(provider, &TimingConfig::default());

        let mut watch = source.watch();
        assert_eq!(
            watch.next().await,
            Some(GeoEvent::Error(GeolocationError::Timeout))
        );
        assert_eq!(watch.next().await, None);
    }

    struct StaleOnlyProvider;

    #[async_trait]
    impl PositionProvider for StaleOnlyProvider {
        async fn next_position(&self, _fresh: bool) -> Result<GeoFix, GeolocationError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(fix_aged(60))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stale_readings_do_not_postpone_the_timeout() {
        let timing = TimingConfig::default();
        let source = GeolocationSource::new(Arc::new(StaleOnlyProvider), &timing);
        let started = Instant::now();

        let mut watch = source.watch();
        let event = tokio::time::timeout(Duration::from_secs(60), watch.next()).await;

        assert_eq!(
            event,
            Ok(Some(GeoEvent::Error(GeolocationError::Timeout)))
        );
        assert!(started.elapsed() <= timing.gps_timeout + Duration::from_millis(10));
    }

    #[tokio::test]
    async fn permission_denied_is_terminal() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(GeolocationError::PermissionDenied),
            Ok(fix_aged(0)),
        ]));
        let source = GeolocationSource::new(provider, &TimingConfig::default());

        let mut watch = source.watch();
        assert_eq!(
            watch.next().await,
            Some(GeoEvent::Error(GeolocationError::PermissionDenied))
        );
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let provider = Arc::new(ScriptedProvider::new(Vec::new()));
        let source = GeolocationSource::new(provider, &TimingConfig::default());

        let mut watch = source.watch();
        watch.release();
        watch.release();

        assert!(watch.is_released());
        assert_eq!(watch.next().await, None);
    }
}
