use async_trait::async_trait;
use futures::StreamExt;
use lapin::{message, options::*, types::FieldTable, Channel};
use tracing::{error, info};

use super::subscription::{AckMode, Delivery, DeliveryError, Subscription, SubscriptionError};

/// Subscription over a RabbitMQ queue.
pub struct AmqpSubscription {
    consumer: lapin::Consumer,
}

impl AmqpSubscription {
    pub async fn open(
        channel: &Channel,
        queue_name: &str,
        consumer_tag: &str,
        ack_mode: AckMode,
    ) -> Result<Self, lapin::Error> {
        let consumer = channel
            .basic_consume(
                queue_name,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: ack_mode.is_auto(),
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                error!(error = %e, queue = %queue_name, "Failed to register consumer");
                e
            })?;

        info!(
            queue = %queue_name,
            consumer_tag = %consumer_tag,
            ack_mode = ?ack_mode,
            "Consumer registered"
        );

        Ok(Self { consumer })
    }
}

#[async_trait]
impl Subscription for AmqpSubscription {
    type Delivery = AmqpDelivery;

    async fn next_delivery(&mut self) -> Option<Result<AmqpDelivery, SubscriptionError>> {
        match self.consumer.next().await? {
            Ok(inner) => Some(Ok(AmqpDelivery { inner })),
            Err(e) => Some(Err(SubscriptionError(e.to_string()))),
        }
    }
}

pub struct AmqpDelivery {
    inner: message::Delivery,
}

#[async_trait]
impl Delivery for AmqpDelivery {
    fn body(&self) -> &[u8] {
        &self.inner.data
    }

    fn delivery_tag(&self) -> u64 {
        self.inner.delivery_tag
    }

    fn redelivered(&self) -> bool {
        self.inner.redelivered
    }

    async fn ack(self) -> Result<(), DeliveryError> {
        let delivery_tag = self.inner.delivery_tag;
        self.inner
            .acker
            .ack(BasicAckOptions::default())
            .await
            .map_err(|e| DeliveryError {
                delivery_tag,
                reason: e.to_string(),
            })
    }

    async fn reject(self, requeue: bool) -> Result<(), DeliveryError> {
        let delivery_tag = self.inner.delivery_tag;
        self.inner
            .acker
            .nack(BasicNackOptions {
                multiple: false,
                requeue,
            })
            .await
            .map_err(|e| DeliveryError {
                delivery_tag,
                reason: e.to_string(),
            })
    }
}
