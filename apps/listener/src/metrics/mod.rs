use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

pub mod server;

pub struct Metrics {
    pub messages_received_total: CounterVec,
    pub messages_acked_total: CounterVec,
    pub messages_requeued_total: CounterVec,
    pub messages_discarded_total: CounterVec,
    pub message_processing_duration_seconds: HistogramVec,
    pub active_consumers: Gauge,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let messages_received_total = CounterVec::new(
            Opts::new(
                "listener_messages_received_total",
                "Total number of deliveries pulled from the queue",
            ),
            &["queue"],
        )?;

        let messages_acked_total = CounterVec::new(
            Opts::new(
                "listener_messages_acked_total",
                "Total number of events handled successfully",
            ),
            &["queue"],
        )?;

        let messages_requeued_total = CounterVec::new(
            Opts::new(
                "listener_messages_requeued_total",
                "Total number of deliveries rejected with requeue",
            ),
            &["queue", "reason"],
        )?;

        let messages_discarded_total = CounterVec::new(
            Opts::new(
                "listener_messages_discarded_total",
                "Total number of deliveries rejected without requeue",
            ),
            &["queue", "reason"],
        )?;

        let message_processing_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "listener_message_processing_duration_seconds",
                "Time from receiving a delivery to settling it",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["queue", "disposition"],
        )?;

        let active_consumers = Gauge::new(
            "listener_active_consumers",
            "Number of running consumption loops",
        )?;

        registry.register(Box::new(messages_received_total.clone()))?;
        registry.register(Box::new(messages_acked_total.clone()))?;
        registry.register(Box::new(messages_requeued_total.clone()))?;
        registry.register(Box::new(messages_discarded_total.clone()))?;
        registry.register(Box::new(message_processing_duration_seconds.clone()))?;
        registry.register(Box::new(active_consumers.clone()))?;

        Ok(Arc::new(Self {
            messages_received_total,
            messages_acked_total,
            messages_requeued_total,
            messages_discarded_total,
            message_processing_duration_seconds,
            active_consumers,
            registry,
        }))
    }
}
