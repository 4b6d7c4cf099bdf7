use prometheus::{Counter, Gauge, Registry};
use std::sync::Arc;

pub struct Metrics {
    pub scale_ups: Counter,
    pub scale_downs: Counter,
    pub failed_actions: Counter,
    pub deferred_actions: Counter,
    pub monitored_streams: Gauge,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        let registry = Registry::new();

        let scale_ups = Counter::new("scale_up_actions_total", "Executed scale-up actions")
            .expect("Failed to create scale_ups counter");

        let scale_downs = Counter::new("scale_down_actions_total", "Executed scale-down actions")
            .expect("Failed to create scale_downs counter");

        let failed_actions = Counter::new("failed_actions_total", "Scaling actions that failed")
            .expect("Failed to create failed_actions counter");

        let deferred_actions = Counter::new(
            "deferred_actions_total",
            "Scaling actions deferred by cool-off",
        )
        .expect("Failed to create deferred_actions counter");

        let monitored_streams = Gauge::new("monitored_streams", "Streams under monitoring")
            .expect("Failed to create monitored_streams gauge");

        registry.register(Box::new(scale_ups.clone())).unwrap();
        registry.register(Box::new(scale_downs.clone())).unwrap();
        registry.register(Box::new(failed_actions.clone())).unwrap();
        registry
            .register(Box::new(deferred_actions.clone()))
            .unwrap();
        registry
            .register(Box::new(monitored_streams.clone()))
            .unwrap();

        Arc::new(Self {
            scale_ups,
            scale_downs,
            failed_actions,
            deferred_actions,
            monitored_streams,
            registry,
        })
    }
}
