use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use super::classifier::{DeliveryClassifier, PatternClassifier};
use super::handler::EventHandler;
use super::subscription::{settle, AckMode, Delivery, Disposition, Subscription};
use crate::contracts::codec;
use crate::metrics::Metrics;

/// Counters for one run of the consumption loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub receive_errors: u64,
    pub settle_errors: u64,
}

impl ConsumerStats {
    fn record(&mut self, disposition: Disposition) {
        match disposition {
            Disposition::Ack => self.acked += 1,
            Disposition::Requeue => self.requeued += 1,
            Disposition::Discard => self.discarded += 1,
        }
    }
}

struct Settled {
    disposition: Disposition,
    interrupted: bool,
    settle_failed: bool,
}

/// Pulls deliveries one at a time, decodes them into `Event<P>`, runs the
/// handler and settles each delivery exactly once.
pub struct Consumer<S, P> {
    subscription: S,
    dispatcher: Dispatcher<P>,
}

struct Dispatcher<P> {
    queue_name: String,
    handler: Arc<dyn EventHandler<P>>,
    classifier: Arc<dyn DeliveryClassifier>,
    ack_mode: AckMode,
    shutdown: Arc<Notify>,
    metrics: Arc<Metrics>,
}

impl<S, P> Consumer<S, P>
where
    S: Subscription,
    P: DeserializeOwned + Send + 'static,
{
    pub fn new(
        subscription: S,
        queue_name: impl Into<String>,
        handler: Arc<dyn EventHandler<P>>,
        shutdown: Arc<Notify>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            subscription,
            dispatcher: Dispatcher {
                queue_name: queue_name.into(),
                handler,
                classifier: Arc::new(PatternClassifier::default()),
                ack_mode: AckMode::Manual,
                shutdown,
                metrics,
            },
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn DeliveryClassifier>) -> Self {
        self.dispatcher.classifier = classifier;
        self
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.dispatcher.ack_mode = ack_mode;
        self
    }

    /// Runs until the subscription ends or shutdown is signalled.
    ///
    /// Failures of individual deliveries never stop the loop.
    pub async fn run(mut self) -> ConsumerStats {
        let dispatcher = &self.dispatcher;
        info!(
            queue = %dispatcher.queue_name,
            ack_mode = ?dispatcher.ack_mode,
            "Waiting for messages"
        );

        let mut stats = ConsumerStats::default();
        dispatcher.metrics.active_consumers.inc();

        loop {
            let next = tokio::select! {
                _ = dispatcher.shutdown.notified() => {
                    info!(queue = %dispatcher.queue_name, "Shutdown signal received, stopping consumer");
                    break;
                }
                next = self.subscription.next_delivery() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    stats.received += 1;
                    let settled = dispatcher.process(delivery).await;
                    stats.record(settled.disposition);
                    if settled.settle_failed {
                        stats.settle_errors += 1;
                    }
                    if settled.interrupted {
                        break;
                    }
                }
                Some(Err(e)) => {
                    stats.receive_errors += 1;
                    error!(error = %e, queue = %dispatcher.queue_name, "Error receiving message");
                }
                None => {
                    warn!(queue = %dispatcher.queue_name, "Subscription ended");
                    break;
                }
            }
        }

        dispatcher.metrics.active_consumers.dec();
        info!(
            queue = %dispatcher.queue_name,
            received = stats.received,
            acked = stats.acked,
            requeued = stats.requeued,
            discarded = stats.discarded,
            settle_errors = stats.settle_errors,
            "Consumer stopped"
        );
        stats
    }
}

impl<P> Dispatcher<P>
where
    P: DeserializeOwned + Send + 'static,
{
    async fn process<D: Delivery>(&self, delivery: D) -> Settled {
        let delivery_tag = delivery.delivery_tag();
        let start = Instant::now();

        self.metrics
            .messages_received_total
            .with_label_values(&[&self.queue_name])
            .inc();

        debug!(
            delivery_tag,
            redelivered = delivery.redelivered(),
            payload_size = delivery.body().len(),
            "Received a message"
        );

        let event = match codec::decode::<P>(delivery.body()) {
            Ok(event) => event,
            Err(e) => {
                warn!(delivery_tag, error = %e, "Failed to decode message, discarding");
                self.metrics
                    .messages_discarded_total
                    .with_label_values(&[&self.queue_name, "decode"])
                    .inc();
                return self.finish(delivery, Disposition::Discard, start, false).await;
            }
        };

        let event_name = event.name.clone();

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.notified() => None,
            result = self.handler.handle(event) => Some(result),
        };

        let Some(result) = outcome else {
            warn!(
                delivery_tag,
                event = %event_name,
                "Shutdown during handler execution, requeuing message"
            );
            self.metrics
                .messages_requeued_total
                .with_label_values(&[&self.queue_name, "shutdown"])
                .inc();
            return self.finish(delivery, Disposition::Requeue, start, true).await;
        };

        let disposition = match result {
            Ok(()) => {
                self.metrics
                    .messages_acked_total
                    .with_label_values(&[&self.queue_name])
                    .inc();
                Disposition::Ack
            }
            Err(err) => {
                let verdict = self.classifier.classify(&err);
                if verdict.is_retryable() {
                    warn!(
                        delivery_tag,
                        event = %event_name,
                        error = %err,
                        "Retryable error, requeuing message"
                    );
                    self.metrics
                        .messages_requeued_total
                        .with_label_values(&[&self.queue_name, verdict.as_str()])
                        .inc();
                    Disposition::Requeue
                } else {
                    error!(
                        delivery_tag,
                        event = %event_name,
                        error = %err,
                        "Non-retryable error, rejecting message"
                    );
                    self.metrics
                        .messages_discarded_total
                        .with_label_values(&[&self.queue_name, verdict.as_str()])
                        .inc();
                    Disposition::Discard
                }
            }
        };

        self.finish(delivery, disposition, start, false).await
    }

    async fn finish<D: Delivery>(
        &self,
        delivery: D,
        disposition: Disposition,
        start: Instant,
        interrupted: bool,
    ) -> Settled {
        let delivery_tag = delivery.delivery_tag();
        let mut settle_failed = false;

        if self.ack_mode.is_auto() {
            debug!(
                delivery_tag,
                disposition = disposition.as_str(),
                "Auto-ack mode, broker already settled the message"
            );
        } else if let Err(e) = settle(delivery, disposition).await {
            // The broker redelivers anything left unsettled.
            error!(
                error = %e,
                delivery_tag,
                disposition = disposition.as_str(),
                "Failed to settle message"
            );
            settle_failed = true;
        }

        self.metrics
            .message_processing_duration_seconds
            .with_label_values(&[&self.queue_name, disposition.as_str()])
            .observe(start.elapsed().as_secs_f64());

        Settled {
            disposition,
            interrupted,
            settle_failed,
        }
    }
}
