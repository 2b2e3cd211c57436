use lapin::Channel;
use tracing::info;

use super::amqp::AmqpSubscription;
use super::channel::{ChannelError, ChannelProvider};
use super::connection::{ConnectionError, RabbitMqConnection};
use super::topology::{Topology, TopologyError};
use crate::config::Config;

/// Everything the consumption loop needs from the broker, opened in order.
pub struct Session {
    pub connection: RabbitMqConnection,
    pub channel: Channel,
    pub subscription: AmqpSubscription,
}

/// Failure to get from a broker URL to an open subscription.
///
/// None of these abort the process; the caller decides what to do.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("Failed to register a consumer on {queue}: {reason}")]
    Consume { queue: String, reason: String },
}

/// Connects, opens a channel, provisions the topology and starts consuming.
pub async fn subscribe(config: &Config) -> Result<Session, SetupError> {
    let connection = RabbitMqConnection::connect(&config.rabbitmq_url).await?;
    let channel =
        ChannelProvider::create_channel(connection.get_connection(), config.prefetch_count)
            .await?;

    Topology::new(&config.exchange_name, &config.queue_name)
        .declare(&channel)
        .await?;

    let subscription = AmqpSubscription::open(
        &channel,
        &config.queue_name,
        &config.consumer_tag(),
        config.ack_mode,
    )
    .await
    .map_err(|e| SetupError::Consume {
        queue: config.queue_name.clone(),
        reason: e.to_string(),
    })?;

    info!(queue = %config.queue_name, "Subscription ready");

    Ok(Session {
        connection,
        channel,
        subscription,
    })
}
