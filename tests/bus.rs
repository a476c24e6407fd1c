//! Bus behaviour against the in-process broker
//!
//! These tests cover the publish/subscribe contract:
//! - Delivery of published payloads to subscribers bound beforehand
//! - Concurrent publishers on one connection
//! - Use after close
//! - Prompt cancellation of idle subscriptions
//! - Handler failures leave the message with the broker
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use topicbus::broker::MemoryBroker;
use topicbus::{Bus, BusError, ConnectionManager, Message, Topic};

const EXCHANGE: &str = "events";

fn setup() -> (MemoryBroker, Bus) {
    let broker = MemoryBroker::new();
    let manager = ConnectionManager::with_broker(Arc::new(broker.clone()));
    let bus = Bus::new(Arc::new(manager), EXCHANGE);
    (broker, bus)
}

/// Wait until `count` queues are bound for `topic`
async fn wait_for_subscribers(broker: &MemoryBroker, topic: &str, count: usize) -> Vec<String> {
    timeout(Duration::from_secs(1), async {
        loop {
            let queues = broker.bound_queues(EXCHANGE, topic);
            if queues.len() >= count {
                return queues;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriptions did not bind in time")
}

/// Handler that forwards every message into a channel
fn forward(tx: mpsc::UnboundedSender<Message>) -> impl topicbus::EventHandler {
    move |message: Message| {
        let tx = tx.clone();
        async move {
            tx.send(message)?;
            anyhow::Ok(())
        }
    }
}

#[tokio::test]
async fn test_subscriber_receives_published_payload() {
    let (broker, bus) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = bus.spawn_subscription(Topic::EVENT_CREATED, forward(tx));
    wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;

    bus.publish(Topic::EVENT_CREATED, br#"{"id":"42"}"#)
        .await
        .unwrap();

    let message = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.topic, "event.created");
    assert_eq!(message.payload, br#"{"id":"42"}"#.to_vec());
    assert!(!message.redelivered);

    subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_subscriber_ignores_other_topics() {
    let (broker, bus) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = bus.spawn_subscription(Topic::EVENT_CREATED, forward(tx));
    wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;

    bus.publish(Topic::LOCATION_CREATED, b"elsewhere").await.unwrap();
    bus.publish(Topic::EVENT_CREATED, b"mine").await.unwrap();

    let message = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.payload, b"mine".to_vec());

    subscription.shutdown().await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_publishes_arrive_intact() {
    const N: usize = 64;
    let (broker, bus) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = bus.spawn_subscription(Topic::EVENT_CREATED, forward(tx));
    wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;

    let publishers: Vec<_> = (0..N)
        .map(|i| {
            let bus = bus.clone();
            tokio::spawn(async move {
                let payload = format!("payload-{}", i);
                bus.publish(Topic::EVENT_CREATED, payload.as_bytes()).await
            })
        })
        .collect();
    for publisher in publishers {
        publisher.await.unwrap().unwrap();
    }

    let mut received = HashSet::new();
    for _ in 0..N {
        let message = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.topic, Topic::EVENT_CREATED);
        received.insert(message.payload_str().unwrap().to_string());
    }
    let expected: HashSet<String> = (0..N).map(|i| format!("payload-{}", i)).collect();
    assert_eq!(received, expected);

    subscription.shutdown().await.unwrap();
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_each_subscription_gets_its_own_copy() {
    let (broker, bus) = setup();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();

    let a = bus.spawn_subscription(Topic::EVENT_CREATED, forward(tx_a));
    let b = bus.spawn_subscription(Topic::EVENT_CREATED, forward(tx_b));
    let queues = wait_for_subscribers(&broker, Topic::EVENT_CREATED, 2).await;
    assert_eq!(queues.len(), 2);

    bus.publish(Topic::EVENT_CREATED, b"fan-out").await.unwrap();

    for rx in [&mut rx_a, &mut rx_b] {
        let message = timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.payload, b"fan-out".to_vec());
    }

    a.shutdown().await.unwrap();
    b.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_wildcard_subscription() {
    let (broker, bus) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = bus.spawn_subscription(Topic::ALL_EVENTS, forward(tx));
    wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;

    bus.publish(Topic::EVENT_CREATED, b"created").await.unwrap();

    let message = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(message.topic, Topic::EVENT_CREATED);

    subscription.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_publish_after_close_fails_without_hanging() {
    let (_broker, bus) = setup();
    bus.close().await.unwrap();

    let result = timeout(
        Duration::from_secs(1),
        bus.publish(Topic::EVENT_CREATED, b"late"),
    )
    .await
    .expect("publish after close must not hang");
    assert!(matches!(result, Err(BusError::ConnectionClosed)));

    // closing again is a no-op
    bus.close().await.unwrap();
}

#[tokio::test]
async fn test_cancel_returns_promptly_when_idle() {
    let (broker, bus) = setup();
    let cancel = CancellationToken::new();

    let handle = {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            bus.subscribe(cancel, Topic::EVENT_CREATED, |_m: Message| async {
                anyhow::Ok(())
            })
            .await
        })
    };
    wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;

    let started = Instant::now();
    cancel.cancel();
    let result = timeout(Duration::from_secs(1), handle)
        .await
        .expect("subscribe did not return after cancel")
        .unwrap();

    assert!(result.is_ok());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(broker.open_channels(), 0);
    // the subscription's queue went with it
    assert!(broker.bound_queues(EXCHANGE, Topic::EVENT_CREATED).is_empty());
    assert!(broker.queue_names().is_empty());
}

#[tokio::test]
async fn test_handler_failure_stops_subscription_and_keeps_message() {
    let (broker, bus) = setup();

    let subscription = bus.spawn_subscription(Topic::EVENT_CREATED, |message: Message| async move {
        Err::<(), _>(anyhow::anyhow!(
            "cannot process {}",
            message.payload_str().unwrap_or("?")
        ))
    });
    let queues = wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;

    bus.publish(Topic::EVENT_CREATED, b"poison").await.unwrap();

    let result = timeout(Duration::from_secs(1), subscription.join())
        .await
        .unwrap();
    match result {
        Err(BusError::Handler(e)) => assert_eq!(e.to_string(), "cannot process poison"),
        other => panic!("expected handler error, got {:?}", other),
    }

    // never acked: the message is back in its queue
    assert_eq!(broker.queue_depth(&queues[0]), Some(1));
    assert_eq!(broker.queued_payloads(&queues[0]), vec![b"poison".to_vec()]);
    assert_eq!(broker.open_channels(), 0);
}

#[tokio::test]
async fn test_publish_without_subscribers_succeeds() {
    let (broker, bus) = setup();

    bus.publish(Topic::EVENT_CREATED, br#"{"id":"42"}"#)
        .await
        .unwrap();

    assert!(broker.exchange_exists(EXCHANGE));
    assert!(broker.bound_queues(EXCHANGE, Topic::EVENT_CREATED).is_empty());
}

#[tokio::test]
async fn test_close_drains_subscriptions() {
    let (broker, bus) = setup();
    let (tx, _rx) = mpsc::unbounded_channel();

    let subscription = bus.spawn_subscription(Topic::EVENT_CREATED, forward(tx));
    wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;
    assert_eq!(bus.connection().in_flight(), 1);

    timeout(Duration::from_secs(1), bus.close())
        .await
        .unwrap()
        .unwrap();

    assert!(subscription.join().await.is_ok());
    assert_eq!(bus.connection().in_flight(), 0);
    assert!(!bus.is_alive());
    assert!(broker.queue_names().is_empty());
}

#[tokio::test]
async fn test_typed_events_carry_json_content_type() {
    let (broker, bus) = setup();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let subscription = bus.spawn_subscription(Topic::EVENT_CREATED, forward(tx));
    wait_for_subscribers(&broker, Topic::EVENT_CREATED, 1).await;

    let event: topicbus::models::Event = serde_json::from_value(serde_json::json!({
        "name": "Concert",
        "start_date": "2026-05-01T19:00:00Z",
        "end_date": "2026-05-01T21:00:00Z",
        "location": {"name": "Arena"}
    }))
    .unwrap();
    bus.publish_event(&topicbus::models::EventCreated::from(&event))
        .await
        .unwrap();
    bus.publish(Topic::EVENT_CREATED, b"raw").await.unwrap();

    let typed = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    let raw = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(typed.content_type.as_deref(), Some("application/json"));
    assert_eq!(raw.content_type, None);

    subscription.shutdown().await.unwrap();
}
