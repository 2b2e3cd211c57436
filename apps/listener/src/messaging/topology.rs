use lapin::{options::*, types::FieldTable, Channel, ExchangeKind};
use tracing::{error, info};

/// A durable fanout exchange and one durable queue bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub queue: String,
}

impl Topology {
    pub fn new(exchange: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            queue: queue.into(),
        }
    }

    /// Declares the exchange and queue and binds them. Declarations are
    /// idempotent on the broker, so this is safe to run on every start.
    pub async fn declare(&self, channel: &Channel) -> Result<(), TopologyError> {
        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                error!(error = %e, exchange = %self.exchange, "Failed to declare exchange");
                TopologyError::ExchangeDeclare(e.to_string())
            })?;

        let queue = channel
            .queue_declare(
                &self.queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                error!(error = %e, queue = %self.queue, "Failed to declare queue");
                TopologyError::QueueDeclare(e.to_string())
            })?;

        // Fanout exchanges ignore the routing key.
        channel
            .queue_bind(
                queue.name().as_str(),
                &self.exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                error!(
                    error = %e,
                    queue = %self.queue,
                    exchange = %self.exchange,
                    "Failed to bind queue"
                );
                TopologyError::QueueBind(e.to_string())
            })?;

        info!(
            exchange = %self.exchange,
            queue = %self.queue,
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "Queue topology configured"
        );

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("Failed to declare exchange: {0}")]
    ExchangeDeclare(String),

    #[error("Failed to declare queue: {0}")]
    QueueDeclare(String),

    #[error("Failed to bind queue: {0}")]
    QueueBind(String),
}
