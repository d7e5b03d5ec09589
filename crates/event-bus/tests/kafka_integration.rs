//! Kafka integration tests for the broker-backed bus.
//!
//! They start a Kafka container and take a while, so they are ignored by
//! default:
//!
//! ```bash
//! cargo test -p event-bus --features kafka --test kafka_integration -- --ignored
//! ```

#![cfg(feature = "kafka")]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, OrderId, PaymentId, UserId};
use event_bus::{
    Consumer, ConsumerConfig, EventBus, EventHandler, HandlerError, KafkaConfig, KafkaEventBus,
    MemberId, PAYMENT_COMPLETED_TOPIC, PaymentCompleted, Producer, TopicPartition,
};
use serial_test::serial;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};
use tokio::sync::Mutex;

#[derive(Default)]
struct RecordingHandler {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn handle_payment_completed(&self, event: &PaymentCompleted) -> Result<(), HandlerError> {
        self.seen.lock().await.push(event.payment_id.to_string());
        Ok(())
    }
}

fn event(n: usize) -> PaymentCompleted {
    PaymentCompleted {
        payment_id: PaymentId::new(format!("pay_{n}")),
        order_id: OrderId::new(format!("order_{n}")),
        user_id: UserId::new(format!("u{n}")),
        amount: Money::from_cents(100),
        currency: "USD".to_string(),
        payment_method: "card".to_string(),
        completed_at: Utc::now(),
    }
}

async fn start_kafka() -> (ContainerAsync<Kafka>, KafkaEventBus) {
    let container = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "false")
        .start()
        .await
        .unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(KAFKA_PORT).await.unwrap();

    let mut config = KafkaConfig::new(format!("{host}:{port}"));
    config.request_timeout = Duration::from_secs(10);
    let bus = KafkaEventBus::new(config).unwrap();

    // The broker accepts connections before it can create topics.
    for _ in 0..60 {
        if bus.partition_count(PAYMENT_COMPLETED_TOPIC).await.is_ok_and(|n| n == 3) {
            return (container, bus);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    panic!("kafka did not become ready");
}

/// Polls until the member owns partitions and the handler saw `expected` records.
async fn poll_until<H: EventHandler>(
    consumer: &Consumer<KafkaEventBus, Arc<H>>,
    member: &MemberId,
    seen: impl Fn() -> usize,
    expected: usize,
) {
    for _ in 0..120 {
        consumer.poll(member).await.unwrap();
        if seen() >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    panic!("handled {} of {expected} records", seen());
}

#[tokio::test]
#[ignore]
#[serial]
async fn published_payments_are_handled_and_committed() {
    let (_container, bus) = start_kafka().await;
    let producer = Producer::new(bus.clone());
    for n in 0..10 {
        producer.publish(&event(n)).await.unwrap();
    }

    let handler = Arc::new(RecordingHandler::default());
    let consumer = Consumer::new(bus.clone(), handler.clone(), ConsumerConfig::new("cart"));
    let member = consumer.join().await.unwrap();

    let counter = handler.clone();
    poll_until(
        &consumer,
        &member,
        || counter.seen.try_lock().map_or(0, |seen| seen.len()),
        10,
    )
    .await;

    let seen: HashSet<String> = handler.seen.lock().await.iter().cloned().collect();
    assert_eq!(seen.len(), 10);

    let mut committed = 0;
    for partition in 0..3 {
        let tp = TopicPartition::new(PAYMENT_COMPLETED_TOPIC, partition);
        if let Some(offset) = bus.committed("cart", &tp).await.unwrap() {
            committed += offset.as_i64();
        }
    }
    assert_eq!(committed, 10);

    consumer.leave(&member).await.unwrap();
}

#[tokio::test]
#[ignore]
#[serial]
async fn new_member_resumes_after_committed_offsets() {
    let (_container, bus) = start_kafka().await;
    let producer = Producer::new(bus.clone());
    for n in 0..4 {
        producer.publish(&event(n)).await.unwrap();
    }

    let first = Arc::new(RecordingHandler::default());
    let consumer = Consumer::new(bus.clone(), first.clone(), ConsumerConfig::new("catalog"));
    let member = consumer.join().await.unwrap();
    let counter = first.clone();
    poll_until(
        &consumer,
        &member,
        || counter.seen.try_lock().map_or(0, |seen| seen.len()),
        4,
    )
    .await;
    consumer.leave(&member).await.unwrap();

    for n in 4..6 {
        producer.publish(&event(n)).await.unwrap();
    }

    let second = Arc::new(RecordingHandler::default());
    let consumer = Consumer::new(bus.clone(), second.clone(), ConsumerConfig::new("catalog"));
    let member = consumer.join().await.unwrap();
    let counter = second.clone();
    poll_until(
        &consumer,
        &member,
        || counter.seen.try_lock().map_or(0, |seen| seen.len()),
        2,
    )
    .await;

    let mut seen = second.seen.lock().await.clone();
    seen.sort();
    assert_eq!(seen, vec!["pay_4".to_string(), "pay_5".to_string()]);
    consumer.leave(&member).await.unwrap();
}
