use lapin::{options::BasicPublishOptions, BasicProperties, Channel};
use serde::Serialize;
use tracing::{debug, error};

use crate::contracts::{encode, CodecError, Event};

const CONTENT_TYPE: &str = "application/json";
const PERSISTENT: u8 = 2;

/// Publishes `event` to `exchange` without waiting for a broker confirm.
pub async fn send<P: Serialize>(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    event: &Event<P>,
) -> Result<(), PublishError> {
    let body = encode(event)?;

    // The returned confirm is dropped.
    channel
        .basic_publish(
            exchange,
            routing_key,
            BasicPublishOptions::default(),
            &body,
            BasicProperties::default()
                .with_content_type(CONTENT_TYPE.into())
                .with_delivery_mode(PERSISTENT),
        )
        .await
        .map_err(|e| {
            error!(error = %e, exchange, event = %event.name, "Failed to publish a message");
            PublishError::Publish(e.to_string())
        })?;

    debug!(exchange, event = %event.name, size = body.len(), "Message sent");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error("Failed to publish a message: {0}")]
    Publish(String),
}
