use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub location_publishes_total: IntCounterVec,
    pub location_deletes_total: IntCounterVec,
    pub typing_signals_total: IntCounter,
    pub chat_messages_total: IntCounter,
    pub chat_reads_total: IntCounter,
    pub notifications_total: IntCounterVec,
    pub active_ws_subscriptions: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let location_publishes_total = IntCounterVec::new(
            Opts::new(
                "location_publishes_total",
                "Live location upserts by outcome",
            ),
            &["outcome"],
        )
        .expect("valid location_publishes_total metric");

        let location_deletes_total = IntCounterVec::new(
            Opts::new("location_deletes_total", "Live location deletes by outcome"),
            &["outcome"],
        )
        .expect("valid location_deletes_total metric");

        let typing_signals_total =
            IntCounter::new("typing_signals_total", "Typing signals relayed")
                .expect("valid typing_signals_total metric");

        let chat_messages_total =
            IntCounter::new("chat_messages_total", "Chat messages appended")
                .expect("valid chat_messages_total metric");

        let chat_reads_total = IntCounter::new(
            "chat_reads_total",
            "Chat messages marked as read",
        )
        .expect("valid chat_reads_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Push notifications queued by kind"),
            &["kind"],
        )
        .expect("valid notifications_total metric");

        let active_ws_subscriptions = IntGauge::new(
            "active_ws_subscriptions",
            "Currently open websocket channel subscriptions",
        )
        .expect("valid active_ws_subscriptions metric");

        registry
            .register(Box::new(location_publishes_total.clone()))
            .expect("register location_publishes_total");
        registry
            .register(Box::new(location_deletes_total.clone()))
            .expect("register location_deletes_total");
        registry
            .register(Box::new(typing_signals_total.clone()))
            .expect("register typing_signals_total");
        registry
            .register(Box::new(chat_messages_total.clone()))
            .expect("register chat_messages_total");
        registry
            .register(Box::new(chat_reads_total.clone()))
            .expect("register chat_reads_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(active_ws_subscriptions.clone()))
            .expect("register active_ws_subscriptions");

        Self {
            registry,
            location_publishes_total,
            location_deletes_total,
            typing_signals_total,
            chat_messages_total,
            chat_reads_total,
            notifications_total,
            active_ws_subscriptions,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
