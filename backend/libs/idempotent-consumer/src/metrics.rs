//! Prometheus metrics for the inbox processor, mirroring the outbox side's shape.

use prometheus::{IntCounter, IntGauge, Opts};

#[derive(Clone)]
pub struct InboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub processed: IntCounter,
    pub failed: IntCounter,
}

impl InboxMetrics {
    /// Register gauges/counters against the default registry, labeled by `service`.
    pub fn new(service: &str) -> Self {
        let pending = IntGauge::with_opts(
            Opts::new("inbox_pending", "Number of pending inbox messages").const_label("service", service),
        )
        .expect("valid metric opts");
        let oldest_pending_age_seconds = IntGauge::with_opts(
            Opts::new(
                "inbox_oldest_pending_age_seconds",
                "Age in seconds of the oldest pending inbox message",
            )
            .const_label("service", service),
        )
        .expect("valid metric opts");
        let processed = IntCounter::with_opts(
            Opts::new("inbox_processed_total", "Total inbox messages processed successfully")
                .const_label("service", service),
        )
        .expect("valid metric opts");
        let failed = IntCounter::with_opts(
            Opts::new("inbox_failed_total", "Total inbox message handler failures").const_label("service", service),
        )
        .expect("valid metric opts");

        let registry = prometheus::default_registry();
        let _ = registry.register(Box::new(pending.clone()));
        let _ = registry.register(Box::new(oldest_pending_age_seconds.clone()));
        let _ = registry.register(Box::new(processed.clone()));
        let _ = registry.register(Box::new(failed.clone()));

        Self {
            pending,
            oldest_pending_age_seconds,
            processed,
            failed,
        }
    }
}
