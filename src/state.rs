use std::sync::Arc;

use crate::config::TimingConfig;
use crate::notify::Notifier;
use crate::observability::metrics::Metrics;
use crate::realtime::memory::InMemoryBackend;

pub struct AppState {
    pub backend: Arc<InMemoryBackend>,
    pub notifier: Arc<dyn Notifier>,
    pub timing: TimingConfig,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(event_buffer_size: usize, timing: TimingConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            backend: Arc::new(InMemoryBackend::new(event_buffer_size)),
            notifier,
            timing,
            metrics: Metrics::new(),
        }
    }
}
