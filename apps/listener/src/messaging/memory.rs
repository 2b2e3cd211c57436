//! In-process subscription.
//!
//! Messages published through [`InMemoryQueue`] are handed out by the paired
//! [`InMemorySubscription`] in publish order. Every settlement is recorded so
//! callers can inspect exactly what the consumer decided. Requeued messages
//! are recorded, not redelivered. [`InMemoryQueue::fail_next_settlements`]
//! makes settlement calls fail the way a dropped channel would.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use super::subscription::{Delivery, DeliveryError, Disposition, Subscription, SubscriptionError};
use crate::contracts::{encode, CodecError, Event};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub delivery_tag: u64,
    pub disposition: Disposition,
}

type SettlementLog = Arc<Mutex<Vec<Settlement>>>;

#[derive(Clone, Default)]
struct Ledger {
    settlements: SettlementLog,
    failures_left: Arc<AtomicUsize>,
}

impl Ledger {
    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

enum Item {
    Message(u64, Vec<u8>),
    Fault(String),
    Closed,
}

/// Producer side of an in-memory queue.
#[derive(Clone)]
pub struct InMemoryQueue {
    sender: mpsc::UnboundedSender<Item>,
    next_tag: Arc<AtomicU64>,
    ledger: Ledger,
}

impl InMemoryQueue {
    pub fn new() -> (Self, InMemorySubscription) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let ledger = Ledger::default();

        let queue = Self {
            sender,
            next_tag: Arc::new(AtomicU64::new(1)),
            ledger: ledger.clone(),
        };
        let subscription = InMemorySubscription {
            receiver,
            ledger,
            closed: false,
        };

        (queue, subscription)
    }

    /// Enqueues a raw body and returns its delivery tag, or `None` once the
    /// subscription has been dropped.
    pub fn publish(&self, body: impl Into<Vec<u8>>) -> Option<u64> {
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        self.sender.send(Item::Message(tag, body.into())).ok()?;
        Some(tag)
    }

    pub fn publish_event<P: Serialize>(&self, event: &Event<P>) -> Result<Option<u64>, CodecError> {
        let body = encode(event)?;
        Ok(self.publish(body))
    }

    /// Makes the subscription yield a transport error.
    pub fn inject_fault(&self, reason: impl Into<String>) {
        let _ = self.sender.send(Item::Fault(reason.into()));
    }

    /// Ends the stream once every message published before this call has
    /// been handed out.
    pub fn close(&self) {
        let _ = self.sender.send(Item::Closed);
    }

    /// Makes the next `count` ack/reject calls fail without recording anything.
    pub fn fail_next_settlements(&self, count: usize) {
        self.ledger.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn settlements(&self) -> Vec<Settlement> {
        self.ledger
            .settlements
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn count(&self, disposition: Disposition) -> usize {
        self.settlements()
            .iter()
            .filter(|s| s.disposition == disposition)
            .count()
    }
}

pub struct InMemorySubscription {
    receiver: mpsc::UnboundedReceiver<Item>,
    ledger: Ledger,
    closed: bool,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    type Delivery = InMemoryDelivery;

    async fn next_delivery(&mut self) -> Option<Result<InMemoryDelivery, SubscriptionError>> {
        if self.closed {
            return None;
        }

        match self.receiver.recv().await? {
            Item::Message(delivery_tag, body) => Some(Ok(InMemoryDelivery {
                delivery_tag,
                body,
                ledger: self.ledger.clone(),
            })),
            Item::Fault(reason) => Some(Err(SubscriptionError(reason))),
            Item::Closed => {
                self.closed = true;
                None
            }
        }
    }
}

pub struct InMemoryDelivery {
    delivery_tag: u64,
    body: Vec<u8>,
    ledger: Ledger,
}

impl InMemoryDelivery {
    fn record(self, disposition: Disposition) -> Result<(), DeliveryError> {
        if self.ledger.take_failure() {
            return Err(DeliveryError {
                delivery_tag: self.delivery_tag,
                reason: "channel closed".to_string(),
            });
        }

        let mut log = self.ledger.settlements.lock().map_err(|e| DeliveryError {
            delivery_tag: self.delivery_tag,
            reason: e.to_string(),
        })?;
        log.push(Settlement {
            delivery_tag: self.delivery_tag,
            disposition,
        });
        Ok(())
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn body(&self) -> &[u8] {
        &self.body
    }

    fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    async fn ack(self) -> Result<(), DeliveryError> {
        self.record(Disposition::Ack)
    }

    async fn reject(self, requeue: bool) -> Result<(), DeliveryError> {
        let disposition = if requeue {
            Disposition::Requeue
        } else {
            Disposition::Discard
        };
        self.record(disposition)
    }
}
