//! Publishing envelopes with an acknowledgement policy and bounded retry.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bus::EventBus;
use crate::envelope::Envelope;
use crate::{BusError, OutboundRecord, RecordMetadata, Result};

/// How many replicas must acknowledge a record before `send` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acks {
    /// Fire and forget.
    None,
    /// The partition leader only.
    Leader,
    /// The full in-sync replica set.
    #[default]
    All,
}

impl Acks {
    /// Value of the Kafka `acks` producer setting.
    pub fn as_kafka(&self) -> &'static str {
        match self {
            Acks::None => "0",
            Acks::Leader => "1",
            Acks::All => "all",
        }
    }
}

impl FromStr for Acks {
    type Err = String;

    /// Accepts the Kafka spellings (`0`, `1`, `all`, `-1`) and the variant names.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "0" | "none" => Ok(Acks::None),
            "1" | "leader" => Ok(Acks::Leader),
            "all" | "-1" => Ok(Acks::All),
            other => Err(format!("unknown acks setting {other:?}")),
        }
    }
}

/// Producer settings.
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    pub acks: Acks,
    /// Retries after the first attempt for transport failures.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: Acks::All,
            max_retries: 5,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

/// Publishes envelopes to their topic, keyed by their partition key.
#[derive(Clone)]
pub struct Producer<B: EventBus> {
    bus: B,
    config: ProducerConfig,
}

impl<B: EventBus> Producer<B> {
    /// Creates a producer with default settings (acks=all, 5 retries).
    pub fn new(bus: B) -> Self {
        Self::with_config(bus, ProducerConfig::default())
    }

    pub fn with_config(bus: B, config: ProducerConfig) -> Self {
        Self { bus, config }
    }

    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Publishes an envelope to its own topic using its own partition key.
    pub async fn publish<E: Envelope>(&self, envelope: &E) -> Result<RecordMetadata> {
        self.publish_to(E::TOPIC, envelope.partition_key(), envelope)
            .await
    }

    /// Publishes any serializable value to `topic` under `key`.
    ///
    /// Transport failures are retried up to `max_retries` times; after that
    /// the call fails with `PublishFailed`. Serialization errors fail at once.
    #[tracing::instrument(skip(self, value), fields(acks = ?self.config.acks))]
    pub async fn publish_to<T: Serialize + Sync>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<RecordMetadata> {
        let payload = serde_json::to_vec(value)?;
        let attempts = self.config.max_retries + 1;
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let record = OutboundRecord {
                topic: topic.to_string(),
                key: key.to_string(),
                payload: payload.clone(),
            };

            match self.bus.send(record, self.config.acks).await {
                Ok(metadata) => {
                    metrics::counter!("bus_records_published_total", "topic" => topic.to_string())
                        .increment(1);
                    tracing::info!(
                        partition = metadata.partition,
                        offset = %metadata.offset,
                        "record published"
                    );
                    return Ok(metadata);
                }
                Err(BusError::Transport(reason)) => {
                    tracing::warn!(attempt, attempts, %reason, "publish attempt failed");
                    last_error = reason;
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
                Err(other) => return Err(other),
            }
        }

        metrics::counter!("bus_publish_failures_total", "topic" => topic.to_string()).increment(1);
        Err(BusError::PublishFailed {
            topic: topic.to_string(),
            attempts,
            reason: last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryEventBus, Offset, PAYMENT_COMPLETED_TOPIC, PaymentCompleted, TopicPartition};
    use chrono::Utc;
    use common::{Money, OrderId, PaymentId, UserId};

    fn payment_completed(payment_id: &str) -> PaymentCompleted {
        PaymentCompleted {
            payment_id: PaymentId::new(payment_id),
            order_id: OrderId::new("order_1"),
            user_id: UserId::new("u1"),
            amount: Money::from_cents(2000),
            currency: "USD".to_string(),
            payment_method: "card".to_string(),
            completed_at: Utc::now(),
        }
    }

    fn fast_config() -> ProducerConfig {
        ProducerConfig {
            retry_backoff: Duration::from_millis(1),
            ..ProducerConfig::default()
        }
    }

    #[test]
    fn default_config_waits_for_all_replicas_and_retries_five_times() {
        let config = ProducerConfig::default();
        assert_eq!(config.acks, Acks::All);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn acks_parse_from_kafka_spellings() {
        assert_eq!("0".parse::<Acks>().unwrap(), Acks::None);
        assert_eq!("leader".parse::<Acks>().unwrap(), Acks::Leader);
        assert_eq!("-1".parse::<Acks>().unwrap(), Acks::All);
        assert_eq!(" ALL ".parse::<Acks>().unwrap(), Acks::All);
        assert!("2".parse::<Acks>().is_err());
        assert_eq!(Acks::Leader.as_kafka(), "1");
    }

    #[tokio::test]
    async fn configured_acks_reach_the_bus() {
        for acks in [Acks::None, Acks::Leader, Acks::All] {
            let bus = InMemoryEventBus::new();
            let producer = Producer::with_config(
                bus.clone(),
                ProducerConfig {
                    acks,
                    ..fast_config()
                },
            );

            producer.publish(&payment_completed("pay_1")).await.unwrap();
            assert_eq!(bus.last_acks().await, Some(acks));
        }
    }

    #[tokio::test]
    async fn publish_uses_envelope_topic_and_key() {
        let bus = InMemoryEventBus::with_partitions(1);
        let producer = Producer::new(bus.clone());

        let metadata = producer.publish(&payment_completed("pay_1")).await.unwrap();
        assert_eq!(metadata.offset, Offset::earliest());

        let records = bus
            .fetch(
                &TopicPartition::new(PAYMENT_COMPLETED_TOPIC, 0),
                Offset::earliest(),
                10,
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "pay_1");

        let decoded: PaymentCompleted = serde_json::from_slice(&records[0].payload).unwrap();
        assert_eq!(decoded.payment_id.as_str(), "pay_1");
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_sends(3).await;
        let producer = Producer::with_config(bus.clone(), fast_config());

        producer.publish(&payment_completed("pay_1")).await.unwrap();
        assert_eq!(bus.record_count(PAYMENT_COMPLETED_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_sends(6).await;
        let producer = Producer::with_config(bus.clone(), fast_config());

        let result = producer.publish(&payment_completed("pay_1")).await;
        match result {
            Err(BusError::PublishFailed { attempts, topic, .. }) => {
                assert_eq!(attempts, 6);
                assert_eq!(topic, PAYMENT_COMPLETED_TOPIC);
            }
            other => panic!("expected PublishFailed, got {other:?}"),
        }
        assert_eq!(bus.record_count(PAYMENT_COMPLETED_TOPIC).await, 0);
    }

    #[tokio::test]
    async fn five_failures_still_succeed_on_last_retry() {
        let bus = InMemoryEventBus::new();
        bus.fail_next_sends(5).await;
        let producer = Producer::with_config(bus.clone(), fast_config());

        assert!(producer.publish(&payment_completed("pay_1")).await.is_ok());
    }
}
