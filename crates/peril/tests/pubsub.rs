//! Integration tests for typed publish/subscribe and acknowledgment.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use peril::prelude::*;
use peril::SubscribeOptions;
use peril_broker::{Channel, Properties, X_FIRST_DEATH_QUEUE};
use peril_protocol::routing::{DEAD_LETTER_QUEUE, EXCHANGE_PERIL_TOPIC};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ping {
    seq: u32,
}

async fn setup() -> (Broker, Connection, Channel) {
    let broker = Broker::new();
    let conn = broker.connect().await.expect("connect");
    declare_exchanges(&conn).await.expect("exchanges");
    let publisher = conn.create_channel().await.expect("channel");
    (broker, conn, publisher)
}

fn durable_pings() -> Topology {
    Topology::durable(EXCHANGE_PERIL_TOPIC, "pings", "ping.*")
}

/// Polls `queue` until it holds `count` ready messages.
async fn wait_for_count(channel: &Channel, queue: &str, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if channel.message_count(queue).await.unwrap() == count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{queue} never reached {count} messages"));
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for handler")
        .expect("handler channel closed")
}

// =========================================================================
// Accept
// =========================================================================

#[tokio::test]
async fn test_json_message_reaches_handler_and_is_removed() {
    let (_broker, conn, publisher) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), move |p: Ping| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(p);
            Disposition::Accept
        }
    })
    .await
    .unwrap();
    assert_eq!(sub.queue(), "pings");

    publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq: 1 })
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, Ping { seq: 1 });

    sub.cancel().await.unwrap();
    assert_eq!(publisher.message_count("pings").await.unwrap(), 0);
}

#[tokio::test]
async fn test_msgpack_subscription_decodes_game_logs() {
    let (_broker, conn, publisher) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let topology = Topology::durable(EXCHANGE_PERIL_TOPIC, "logs", "game_logs.*");
    let _sub = subscribe_msgpack(&conn, &topology, SubscribeOptions::default(), move |log: GameLog| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(log);
            Disposition::Accept
        }
    })
    .await
    .unwrap();

    let log = GameLog::now("alice", "alice won a war against bob");
    publish_msgpack(&publisher, EXCHANGE_PERIL_TOPIC, "game_logs.alice", &log)
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, log);
}

// =========================================================================
// RetryLater / Discard
// =========================================================================

#[tokio::test]
async fn test_retry_later_redelivers() {
    let (_broker, conn, publisher) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let counter = Arc::clone(&calls);
    let _sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), move |p: Ping| {
        let counter = Arc::clone(&counter);
        let tx = tx.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Disposition::RetryLater
            } else {
                let _ = tx.send(p);
                Disposition::Accept
            }
        }
    })
    .await
    .unwrap();

    publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq: 7 })
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, Ping { seq: 7 });
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_discard_on_durable_queue_is_quarantined() {
    let (_broker, conn, publisher) = setup().await;
    let _sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), |_p: Ping| async {
        Disposition::Discard
    })
    .await
    .unwrap();

    publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq: 3 })
        .await
        .unwrap();

    wait_for_count(&publisher, DEAD_LETTER_QUEUE, 1).await;
    assert_eq!(publisher.message_count("pings").await.unwrap(), 0);

    let dead = publisher.basic_get(DEAD_LETTER_QUEUE).await.unwrap().unwrap();
    assert_eq!(dead.routing_key, "ping.alice");
    assert_eq!(
        dead.properties.headers.get(X_FIRST_DEATH_QUEUE).map(String::as_str),
        Some("pings")
    );
    let ping: Ping = serde_json::from_slice(&dead.data).unwrap();
    assert_eq!(ping, Ping { seq: 3 });
}

#[tokio::test]
async fn test_undecodable_message_skips_handler() {
    let (_broker, conn, publisher) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&calls);
    let _sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), move |_p: Ping| {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Disposition::Accept }
    })
    .await
    .unwrap();

    publisher
        .basic_publish(
            EXCHANGE_PERIL_TOPIC,
            "ping.alice",
            Properties::with_content_type("application/json"),
            b"{ not json".to_vec(),
        )
        .await
        .unwrap();
    // No codec in this build produces this tag.
    publisher
        .basic_publish(
            EXCHANGE_PERIL_TOPIC,
            "ping.bob",
            Properties::with_content_type("application/gob"),
            br#"{"seq":1}"#.to_vec(),
        )
        .await
        .unwrap();

    wait_for_count(&publisher, DEAD_LETTER_QUEUE, 2).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_content_type_selects_codec() {
    let (_broker, conn, publisher) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let _sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), move |p: Ping| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(p);
            Disposition::Accept
        }
    })
    .await
    .unwrap();

    publish_msgpack(&publisher, EXCHANGE_PERIL_TOPIC, "ping.bob", &Ping { seq: 1 })
        .await
        .unwrap();
    publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq: 2 })
        .await
        .unwrap();

    assert_eq!(recv(&mut rx).await, Ping { seq: 1 });
    assert_eq!(recv(&mut rx).await, Ping { seq: 2 });
    assert_eq!(publisher.message_count(DEAD_LETTER_QUEUE).await.unwrap(), 0);
}

#[tokio::test]
async fn test_untagged_message_uses_subscription_codec() {
    let (_broker, conn, publisher) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();

    let topology = Topology::durable(EXCHANGE_PERIL_TOPIC, "logs", "game_logs.*");
    let _sub = subscribe_msgpack(&conn, &topology, SubscribeOptions::default(), move |log: GameLog| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(log);
            Disposition::Accept
        }
    })
    .await
    .unwrap();

    let log = GameLog::now("bob", "A war between alice and bob resulted in a draw");
    publisher
        .basic_publish(
            EXCHANGE_PERIL_TOPIC,
            "game_logs.alice",
            Properties::default(),
            MsgPackCodec.encode(&log).unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, log);
}

#[tokio::test]
async fn test_discard_on_transient_queue_drops() {
    let (_broker, conn, publisher) = setup().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let topology = Topology::transient(EXCHANGE_PERIL_TOPIC, "pings.alice", "ping.*");
    let _sub = subscribe_json(&conn, &topology, SubscribeOptions::default(), move |p: Ping| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(p);
            Disposition::Discard
        }
    })
    .await
    .unwrap();

    publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq: 1 })
        .await
        .unwrap();
    recv(&mut rx).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(publisher.message_count(DEAD_LETTER_QUEUE).await.unwrap(), 0);
}

// =========================================================================
// Dispatch loop behaviour
// =========================================================================

#[tokio::test]
async fn test_handlers_on_one_queue_never_overlap() {
    let (_broker, conn, publisher) = setup().await;
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let (current, max) = (Arc::clone(&in_flight), Arc::clone(&peak));
    let _sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), move |p: Ping| {
        let (current, max, tx) = (Arc::clone(&current), Arc::clone(&max), tx.clone());
        async move {
            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
            max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            current.fetch_sub(1, Ordering::SeqCst);
            let _ = tx.send(p.seq);
            Disposition::Accept
        }
    })
    .await
    .unwrap();

    for seq in 0..5 {
        publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq })
            .await
            .unwrap();
    }
    let mut seen = Vec::new();
    for _ in 0..5 {
        seen.push(recv(&mut rx).await);
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_handler_timeout_requeues() {
    let (_broker, conn, publisher) = setup().await;
    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let options = SubscribeOptions {
        handler_timeout: Some(Duration::from_millis(20)),
        ..SubscribeOptions::default()
    };
    let counter = Arc::clone(&calls);
    let _sub = subscribe_json(&conn, &durable_pings(), options, move |p: Ping| {
        let counter = Arc::clone(&counter);
        let tx = tx.clone();
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            let _ = tx.send(p);
            Disposition::Accept
        }
    })
    .await
    .unwrap();

    publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq: 9 })
        .await
        .unwrap();
    assert_eq!(recv(&mut rx).await, Ping { seq: 9 });
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_closing_connection_ends_subscription() {
    let (_broker, conn, _publisher) = setup().await;
    let sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), |_p: Ping| async {
        Disposition::Accept
    })
    .await
    .unwrap();

    conn.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), sub.join())
        .await
        .expect("dispatch loop kept running after close");
}

#[tokio::test]
async fn test_cancel_stops_delivery() {
    let (_broker, conn, publisher) = setup().await;
    let sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), |_p: Ping| async {
        Disposition::Accept
    })
    .await
    .unwrap();
    sub.cancel().await.unwrap();

    publish_json(&publisher, EXCHANGE_PERIL_TOPIC, "ping.alice", &Ping { seq: 1 })
        .await
        .unwrap();
    wait_for_count(&publisher, "pings", 1).await;
}

#[tokio::test]
async fn test_subscribe_with_conflicting_topology_fails() {
    let (_broker, conn, _publisher) = setup().await;
    let _sub = subscribe_json(&conn, &durable_pings(), SubscribeOptions::default(), |_p: Ping| async {
        Disposition::Accept
    })
    .await
    .unwrap();

    let transient = Topology::transient(EXCHANGE_PERIL_TOPIC, "pings", "ping.*");
    let err = subscribe_json(&conn, &transient, SubscribeOptions::default(), |_p: Ping| async {
        Disposition::Accept
    })
    .await
    .unwrap_err();
    assert!(matches!(err, PerilError::TopologyConflict { .. }));
}
