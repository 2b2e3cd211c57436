use std::str::FromStr;

use async_trait::async_trait;

/// How deliveries are settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// The consumer acknowledges or rejects every delivery explicitly.
    #[default]
    Manual,
    /// The broker considers a message settled as soon as it is sent.
    Auto,
}

impl AckMode {
    pub fn is_auto(self) -> bool {
        matches!(self, Self::Auto)
    }
}

impl FromStr for AckMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown ack mode: {}", other)),
        }
    }
}

/// Terminal outcome for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Requeue,
    Discard,
}

impl Disposition {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Requeue => "requeue",
            Self::Discard => "discard",
        }
    }
}

/// A unit of work pulled from a subscription.
///
/// The settle methods take `self`, so a delivery can be settled at most once.
#[async_trait]
pub trait Delivery: Send {
    fn body(&self) -> &[u8];

    fn delivery_tag(&self) -> u64;

    fn redelivered(&self) -> bool {
        false
    }

    async fn ack(self) -> Result<(), DeliveryError>;

    async fn reject(self, requeue: bool) -> Result<(), DeliveryError>;
}

/// Issues `disposition` on `delivery`.
pub async fn settle<D: Delivery>(delivery: D, disposition: Disposition) -> Result<(), DeliveryError> {
    match disposition {
        Disposition::Ack => delivery.ack().await,
        Disposition::Requeue => delivery.reject(true).await,
        Disposition::Discard => delivery.reject(false).await,
    }
}

/// A stream of deliveries from one queue.
#[async_trait]
pub trait Subscription: Send {
    type Delivery: Delivery;

    /// Waits for the next delivery. `None` means the subscription has ended.
    async fn next_delivery(&mut self) -> Option<Result<Self::Delivery, SubscriptionError>>;
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to settle delivery {delivery_tag}: {reason}")]
pub struct DeliveryError {
    pub delivery_tag: u64,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
#[error("Error receiving delivery: {0}")]
pub struct SubscriptionError(pub String);
