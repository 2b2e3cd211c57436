//! End-to-end tests for the consumption loop over the in-memory subscription.
//!
//! Each test publishes raw bodies or encoded events, runs the loop until the
//! queue is closed, and checks the settlements the loop issued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanout_listener::contracts::Event;
use fanout_listener::messaging::{
    handler_fn, AckMode, Consumer, DeliveryClassifier, Disposition, EventHandler, HandlerError,
    InMemoryQueue, InMemorySubscription, Settlement, Verdict,
};
use fanout_listener::metrics::Metrics;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{oneshot, Notify};

/// Handler that counts invocations and answers with a fixed result.
struct ScriptedHandler {
    calls: AtomicUsize,
    result: Result<(), HandlerError>,
}

impl ScriptedHandler {
    fn new(result: Result<(), HandlerError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            result,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl EventHandler<Value> for ScriptedHandler {
    async fn handle(&self, _event: Event<Value>) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }
}

fn consumer(
    subscription: InMemorySubscription,
    handler: Arc<dyn EventHandler<Value>>,
) -> Consumer<InMemorySubscription, Value> {
    Consumer::new(
        subscription,
        "test-queue",
        handler,
        Arc::new(Notify::new()),
        Metrics::new().unwrap(),
    )
}

async fn run_single(body: Vec<u8>, result: Result<(), HandlerError>) -> (Vec<Settlement>, usize) {
    let (queue, subscription) = InMemoryQueue::new();
    queue.publish(body);
    queue.close();

    let handler = ScriptedHandler::new(result);
    consumer(subscription, handler.clone()).run().await;

    (queue.settlements(), handler.calls())
}

fn valid_body() -> Vec<u8> {
    serde_json::to_vec(&json!({"event": "user.created", "data": {"id": 1}})).unwrap()
}

#[tokio::test]
async fn malformed_payload_is_discarded_without_calling_handler() {
    let (settlements, calls) = run_single(b"{\"event\": ".to_vec(), Ok(())).await;

    assert_eq!(calls, 0);
    assert_eq!(
        settlements,
        vec![Settlement {
            delivery_tag: 1,
            disposition: Disposition::Discard
        }]
    );
}

#[tokio::test]
async fn schema_violations_never_reach_handler() {
    let (queue, subscription) = InMemoryQueue::new();
    for body in [
        &br#"{"data":{"id":1}}"#[..],
        br#"{"event":"","data":{}}"#,
        br#"{"event":["x"],"data":{}}"#,
        br#"{"event":"x"}"#,
        br#"["user.deleted", {"id": 1}]"#,
        b"\xff\xfe",
    ] {
        queue.publish(body);
    }
    queue.close();

    let handler = ScriptedHandler::new(Ok(()));
    let stats = consumer(subscription, handler.clone()).run().await;

    assert_eq!(handler.calls(), 0);
    assert_eq!(stats.discarded, 6);
    assert_eq!(queue.count(Disposition::Discard), 6);
    assert_eq!(queue.settlements().len(), 6);
}

#[tokio::test]
async fn successful_handler_acks_once() {
    let (settlements, calls) = run_single(valid_body(), Ok(())).await;

    assert_eq!(calls, 1);
    assert_eq!(
        settlements,
        vec![Settlement {
            delivery_tag: 1,
            disposition: Disposition::Ack
        }]
    );
}

#[tokio::test]
async fn timeout_error_is_requeued() {
    let (settlements, calls) =
        run_single(valid_body(), Err(HandlerError::failed("upstream Timeout after 30s"))).await;

    assert_eq!(calls, 1);
    assert_eq!(
        settlements,
        vec![Settlement {
            delivery_tag: 1,
            disposition: Disposition::Requeue
        }]
    );
}

#[tokio::test]
async fn unauthorized_error_is_discarded() {
    let (settlements, calls) =
        run_single(valid_body(), Err(HandlerError::failed("401 Unauthorized"))).await;

    assert_eq!(calls, 1);
    assert_eq!(
        settlements,
        vec![Settlement {
            delivery_tag: 1,
            disposition: Disposition::Discard
        }]
    );
}

#[tokio::test]
async fn unknown_error_is_requeued() {
    let (settlements, _) =
        run_single(valid_body(), Err(HandlerError::failed("disk on fire"))).await;

    assert_eq!(settlements[0].disposition, Disposition::Requeue);
}

#[tokio::test]
async fn explicit_error_kinds_are_respected() {
    let (settlements, _) =
        run_single(valid_body(), Err(HandlerError::permanent("timeout"))).await;
    assert_eq!(settlements[0].disposition, Disposition::Discard);

    let (settlements, _) =
        run_single(valid_body(), Err(HandlerError::transient("not found"))).await;
    assert_eq!(settlements[0].disposition, Disposition::Requeue);
}

#[tokio::test]
async fn every_delivery_settled_exactly_once_in_order() {
    let (queue, subscription) = InMemoryQueue::new();
    let scenarios = [
        json!({"event": "ok", "data": 1}),
        json!({"event": "retry", "data": 2}),
        json!({"event": "drop", "data": 3}),
        json!({"event": "ok", "data": 4}),
        json!({"event": "other", "data": 5}),
    ];
    for scenario in &scenarios {
        queue.publish(serde_json::to_vec(scenario).unwrap());
    }
    queue.publish("garbage");
    queue.close();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let handler: Arc<dyn EventHandler<Value>> = Arc::new(handler_fn(move |event: Event<Value>| {
        seen_clone.lock().unwrap().push(event.payload.clone());
        async move {
            match event.name.as_str() {
                "ok" => Ok(()),
                "retry" => Err(HandlerError::failed("database is locked")),
                "drop" => Err(HandlerError::failed("order not found")),
                other => Err(HandlerError::unhandled(other)),
            }
        }
    }));

    let stats = consumer(subscription, handler).run().await;

    let settlements = queue.settlements();
    let mut per_tag: HashMap<u64, usize> = HashMap::new();
    for settlement in &settlements {
        *per_tag.entry(settlement.delivery_tag).or_default() += 1;
    }
    assert_eq!(per_tag.len(), 6);
    assert!(per_tag.values().all(|count| *count == 1));

    let dispositions: Vec<Disposition> = settlements.iter().map(|s| s.disposition).collect();
    assert_eq!(
        dispositions,
        vec![
            Disposition::Ack,
            Disposition::Requeue,
            Disposition::Discard,
            Disposition::Ack,
            Disposition::Discard,
            Disposition::Discard,
        ]
    );
    assert_eq!(*seen.lock().unwrap(), vec![json!(1), json!(2), json!(3), json!(4), json!(5)]);
    assert_eq!(stats.received, 6);
    assert_eq!(stats.acked + stats.requeued + stats.discarded, 6);
}

#[tokio::test]
async fn transport_errors_do_not_stop_the_loop() {
    let (queue, subscription) = InMemoryQueue::new();
    queue.inject_fault("connection reset");
    queue.publish(valid_body());
    queue.close();

    let handler = ScriptedHandler::new(Ok(()));
    let stats = consumer(subscription, handler.clone()).run().await;

    assert_eq!(stats.receive_errors, 1);
    assert_eq!(handler.calls(), 1);
    assert_eq!(queue.count(Disposition::Ack), 1);
}

#[tokio::test]
async fn shutdown_during_handler_requeues_in_flight_delivery() {
    let (queue, subscription) = InMemoryQueue::new();
    queue.publish(valid_body());
    queue.publish(valid_body());

    let (started_tx, started_rx) = oneshot::channel::<()>();
    let started_tx = Arc::new(Mutex::new(Some(started_tx)));
    let handler: Arc<dyn EventHandler<Value>> = Arc::new(handler_fn(move |_event: Event<Value>| {
        if let Some(tx) = started_tx.lock().unwrap().take() {
            let _ = tx.send(());
        }
        async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<(), HandlerError>(())
        }
    }));

    let shutdown = Arc::new(Notify::new());
    let consumer = Consumer::new(
        subscription,
        "test-queue",
        handler,
        shutdown.clone(),
        Metrics::new().unwrap(),
    );
    let task = tokio::spawn(consumer.run());

    started_rx.await.unwrap();
    shutdown.notify_one();
    let stats = task.await.unwrap();

    assert_eq!(stats.received, 1);
    assert_eq!(stats.requeued, 1);
    assert_eq!(
        queue.settlements(),
        vec![Settlement {
            delivery_tag: 1,
            disposition: Disposition::Requeue
        }]
    );
}

#[tokio::test]
async fn custom_classifier_replaces_default_policy() {
    struct NeverRetry;

    impl DeliveryClassifier for NeverRetry {
        fn classify(&self, _error: &HandlerError) -> Verdict {
            Verdict::NotRetryable
        }
    }

    let (queue, subscription) = InMemoryQueue::new();
    queue.publish(valid_body());
    queue.close();

    let handler = ScriptedHandler::new(Err(HandlerError::failed("timeout")));
    consumer(subscription, handler)
        .with_classifier(Arc::new(NeverRetry))
        .run()
        .await;

    assert_eq!(queue.count(Disposition::Discard), 1);
}

#[tokio::test]
async fn auto_ack_mode_leaves_settlement_to_broker() {
    let (queue, subscription) = InMemoryQueue::new();
    queue.publish(valid_body());
    queue.publish("garbage");
    queue.close();

    let handler = ScriptedHandler::new(Ok(()));
    let stats = consumer(subscription, handler.clone())
        .with_ack_mode(AckMode::Auto)
        .run()
        .await;

    assert_eq!(handler.calls(), 1);
    assert_eq!(stats.acked, 1);
    assert_eq!(stats.discarded, 1);
    assert!(queue.settlements().is_empty());
}

#[tokio::test]
async fn typed_payloads_are_decoded_per_consumer() {
    #[derive(Debug, Deserialize)]
    struct UserCreated {
        id: u64,
    }

    let (queue, subscription) = InMemoryQueue::new();
    queue
        .publish_event(&Event::new("user.created", json!({"id": 9})))
        .unwrap();
    queue
        .publish_event(&Event::new("user.created", json!({"id": "nine"})))
        .unwrap();
    queue.close();

    let ids = Arc::new(Mutex::new(Vec::new()));
    let ids_clone = ids.clone();
    let handler: Arc<dyn EventHandler<UserCreated>> =
        Arc::new(handler_fn(move |event: Event<UserCreated>| {
            ids_clone.lock().unwrap().push(event.payload.id);
            async { Ok::<(), HandlerError>(()) }
        }));

    Consumer::new(
        subscription,
        "users",
        handler,
        Arc::new(Notify::new()),
        Metrics::new().unwrap(),
    )
    .run()
    .await;

    assert_eq!(*ids.lock().unwrap(), vec![9]);
    assert_eq!(
        queue.settlements(),
        vec![
            Settlement {
                delivery_tag: 1,
                disposition: Disposition::Ack
            },
            Settlement {
                delivery_tag: 2,
                disposition: Disposition::Discard
            },
        ]
    );
}

#[tokio::test]
async fn dynamic_payload_converted_by_event_name() {
    #[derive(Debug, Deserialize)]
    struct Invoice {
        amount: u64,
    }

    let (queue, subscription) = InMemoryQueue::new();
    queue
        .publish_event(&Event::new("invoice.paid", json!({"amount": 100})))
        .unwrap();
    queue
        .publish_event(&Event::new("invoice.paid", json!({"amount": -1})))
        .unwrap();
    queue.close();

    let total = Arc::new(AtomicUsize::new(0));
    let total_clone = total.clone();
    let handler: Arc<dyn EventHandler<Value>> = Arc::new(handler_fn(move |event: Event<Value>| {
        let total = total_clone.clone();
        async move {
            match event.name.as_str() {
                "invoice.paid" => {
                    let invoice = event.into_typed::<Invoice>()?;
                    total.fetch_add(invoice.payload.amount as usize, Ordering::SeqCst);
                    Ok(())
                }
                other => Err(HandlerError::unhandled(other)),
            }
        }
    }));

    consumer(subscription, handler).run().await;

    assert_eq!(total.load(Ordering::SeqCst), 100);
    assert_eq!(queue.count(Disposition::Ack), 1);
    assert_eq!(queue.count(Disposition::Discard), 1);
}

#[tokio::test]
async fn failed_settlement_does_not_stop_the_loop() {
    let (queue, subscription) = InMemoryQueue::new();
    queue.publish(valid_body());
    queue.publish(valid_body());
    queue.publish("garbage");
    queue.close();
    queue.fail_next_settlements(1);

    let handler = ScriptedHandler::new(Ok(()));
    let stats = consumer(subscription, handler.clone()).run().await;

    assert_eq!(handler.calls(), 2);
    assert_eq!(stats.received, 3);
    assert_eq!(stats.settle_errors, 1);
    assert_eq!(
        queue.settlements(),
        vec![
            Settlement {
                delivery_tag: 2,
                disposition: Disposition::Ack
            },
            Settlement {
                delivery_tag: 3,
                disposition: Disposition::Discard
            },
        ]
    );
}

#[tokio::test]
async fn sequence_shaped_body_is_discarded() {
    let (settlements, calls) = run_single(br#"["user.deleted", {"id": 1}]"#.to_vec(), Ok(())).await;

    assert_eq!(calls, 0);
    assert_eq!(
        settlements,
        vec![Settlement {
            delivery_tag: 1,
            disposition: Disposition::Discard
        }]
    );
}
