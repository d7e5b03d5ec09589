//! Kafka-backed event bus.
//!
//! Records live in broker topics, so they outlive the process and every
//! process that joins a group shares its committed offsets. Group membership
//! goes through the broker's coordinator with round-robin assignment.
//! Offsets are never committed automatically: the [`Consumer`](crate::Consumer)
//! commits one only after its handler succeeds.
//!
//! Member consumers keep their assigned partitions paused and are polled only
//! to take part in the group protocol. Records are read through a separate,
//! manually assigned reader so that a fetch can start at any offset.
//!
//! librdkafka calls that block on the network run on the blocking pool.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer as _};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::{Offset as KafkaOffset, TopicPartitionList};
use tokio::sync::watch;

use crate::bus::{Assignment, EventBus, MemberId};
use crate::producer::Acks;
use crate::{BusError, Offset, OutboundRecord, Record, RecordMetadata, Result, TopicPartition};

/// Longest single wait of the reader while a fetch is filling its batch.
const FETCH_POLL: Duration = Duration::from_millis(100);

/// Connection and topic settings.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma separated `host:port` list.
    pub brokers: String,
    /// Partition count of topics this bus creates.
    pub partitions: u32,
    pub replication_factor: i32,
    /// Bound on each broker round trip and on delivery of a produced record.
    pub request_timeout: Duration,
    pub session_timeout: Duration,
}

impl KafkaConfig {
    pub fn new(brokers: impl Into<String>) -> Self {
        Self {
            brokers: brokers.into(),
            partitions: 3,
            replication_factor: 1,
            request_timeout: Duration::from_secs(5),
            session_timeout: Duration::from_secs(6),
        }
    }

    fn client(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", &self.brokers);
        client
    }

    /// Producer settings for one acknowledgement policy.
    ///
    /// Keys are partitioned with murmur2 like the in-memory bus, so a payment
    /// keeps its partition whichever bus carries it.
    pub fn producer(&self, acks: Acks) -> ClientConfig {
        let mut client = self.client();
        client
            .set("acks", acks.as_kafka())
            .set("partitioner", "murmur2_random")
            .set("message.timeout.ms", millis(self.request_timeout));
        client
    }

    /// Consumer settings for `group`: manual commits, earliest reset and
    /// round-robin assignment.
    pub fn consumer(&self, group: &str) -> ClientConfig {
        let mut client = self.client();
        client
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("partition.assignment.strategy", "roundrobin")
            .set("session.timeout.ms", millis(self.session_timeout))
            .set("enable.partition.eof", "false");
        client
    }
}

fn millis(duration: Duration) -> String {
    duration.as_millis().to_string()
}

struct Member {
    group: String,
    consumer: Arc<BaseConsumer>,
    partitions: Vec<TopicPartition>,
    generation: u64,
}

struct Inner {
    config: KafkaConfig,
    admin: AdminClient<DefaultClientContext>,
    reader: Mutex<BaseConsumer>,
    producers: Mutex<HashMap<Acks, FutureProducer>>,
    offset_readers: Mutex<HashMap<String, Arc<BaseConsumer>>>,
    members: Mutex<HashMap<MemberId, Member>>,
    known_topics: Mutex<HashSet<String>>,
    next_member: AtomicU64,
    appended: watch::Sender<u64>,
}

/// Event bus on a Kafka-compatible broker. Shared by cloning.
#[derive(Clone)]
pub struct KafkaEventBus {
    inner: Arc<Inner>,
}

impl KafkaEventBus {
    /// Creates the admin client and reader. Brokers are contacted lazily.
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let admin: AdminClient<DefaultClientContext> = config.client().create()?;
        let reader: BaseConsumer = config.consumer("event-bus-reader").create()?;
        tracing::info!(
            brokers = %config.brokers,
            partitions = config.partitions,
            "kafka event bus created"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                admin,
                reader: Mutex::new(reader),
                producers: Mutex::new(HashMap::new()),
                offset_readers: Mutex::new(HashMap::new()),
                members: Mutex::new(HashMap::new()),
                known_topics: Mutex::new(HashSet::new()),
                next_member: AtomicU64::new(0),
                appended: watch::Sender::new(0),
            }),
        })
    }

    pub fn config(&self) -> &KafkaConfig {
        &self.inner.config
    }

    fn producer(&self, acks: Acks) -> Result<FutureProducer> {
        let mut producers = lock(&self.inner.producers);
        if let Some(producer) = producers.get(&acks) {
            return Ok(producer.clone());
        }
        let producer: FutureProducer = self.inner.config.producer(acks).create()?;
        producers.insert(acks, producer.clone());
        Ok(producer)
    }

    /// Unsubscribed consumer of `group`, used to read its committed offsets.
    fn offset_reader(&self, group: &str) -> Result<Arc<BaseConsumer>> {
        let mut readers = lock(&self.inner.offset_readers);
        if let Some(reader) = readers.get(group) {
            return Ok(reader.clone());
        }
        let reader: Arc<BaseConsumer> = Arc::new(self.inner.config.consumer(group).create()?);
        readers.insert(group.to_string(), reader.clone());
        Ok(reader)
    }

    /// Creates the topic with the configured partition count unless it exists.
    async fn ensure_topic(&self, topic: &str) -> Result<()> {
        let known = lock(&self.inner.known_topics).contains(topic);
        if known {
            return Ok(());
        }

        let config = &self.inner.config;
        let new_topic = NewTopic::new(
            topic,
            i32::try_from(config.partitions).unwrap_or(i32::MAX),
            TopicReplication::Fixed(config.replication_factor),
        );
        let options = AdminOptions::new().operation_timeout(Some(config.request_timeout));
        let results = self
            .inner
            .admin
            .create_topics([&new_topic], &options)
            .await?;

        for result in results {
            match result {
                Ok(name) => tracing::info!(topic = %name, "topic created"),
                Err((_, RDKafkaErrorCode::TopicAlreadyExists)) => {}
                Err((name, code)) => {
                    return Err(BusError::Transport(format!("creating topic {name}: {code}")));
                }
            }
        }
        lock(&self.inner.known_topics).insert(topic.to_string());
        Ok(())
    }

    fn member_consumer(
        &self,
        group: &str,
        member: &MemberId,
        partition: &TopicPartition,
    ) -> Result<Arc<BaseConsumer>> {
        let members = lock(&self.inner.members);
        let entry = members
            .get(member)
            .filter(|m| m.group == group)
            .ok_or_else(|| unknown_member(group, member))?;
        if !entry.partitions.contains(partition) {
            return Err(not_assigned(group, member, partition));
        }
        Ok(entry.consumer.clone())
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
    async fn send(&self, record: OutboundRecord, acks: Acks) -> Result<RecordMetadata> {
        self.ensure_topic(&record.topic).await?;
        let producer = self.producer(acks)?;

        let delivery = producer
            .send(
                FutureRecord::to(&record.topic)
                    .key(record.key.as_str())
                    .payload(record.payload.as_slice()),
                Timeout::After(self.inner.config.request_timeout),
            )
            .await;
        let (partition, offset) = delivery.map_err(|(e, _)| BusError::from(e))?;

        // acks=0 reports no offset.
        tracing::trace!(?acks, partition, offset, "record delivered");
        self.inner
            .appended
            .send_modify(|seq| *seq = seq.wrapping_add(1));
        Ok(RecordMetadata {
            partition: partition_index(partition),
            offset: Offset::new(offset),
        })
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        self.ensure_topic(topic).await?;
        let inner = self.inner.clone();
        let topic = topic.to_string();
        blocking(move || {
            let reader = lock(&inner.reader);
            let timeout = inner.config.request_timeout;
            let metadata = reader.fetch_metadata(Some(topic.as_str()), timeout)?;
            Ok(metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .map(|t| t.partitions().len() as u32)
                .unwrap_or(0))
        })
        .await
    }

    async fn fetch(
        &self,
        partition: &TopicPartition,
        from: Offset,
        max: usize,
    ) -> Result<Vec<Record>> {
        let inner = self.inner.clone();
        let tp = partition.clone();
        blocking(move || {
            let reader = lock(&inner.reader);
            let timeout = inner.config.request_timeout;
            let index = kafka_partition(&tp);

            let (low, high) = reader.fetch_watermarks(&tp.topic, index, timeout)?;
            let start = from.as_i64().max(low);
            if start >= high || max == 0 {
                return Ok(Vec::new());
            }

            let mut assignment = TopicPartitionList::new();
            assignment.add_partition_offset(&tp.topic, index, KafkaOffset::Offset(start))?;
            reader.assign(&assignment)?;

            let wanted = usize::try_from(high - start).map_or(max, |available| available.min(max));
            let deadline = Instant::now() + timeout;
            let mut records = Vec::with_capacity(wanted);
            while records.len() < wanted && Instant::now() < deadline {
                match reader.poll(FETCH_POLL) {
                    Some(Ok(message)) => records.push(Record {
                        topic: tp.topic.clone(),
                        partition: tp.partition,
                        offset: Offset::new(message.offset()),
                        key: message
                            .key()
                            .map(|k| String::from_utf8_lossy(k).into_owned())
                            .unwrap_or_default(),
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        timestamp: message
                            .timestamp()
                            .to_millis()
                            .and_then(DateTime::from_timestamp_millis)
                            .unwrap_or_else(Utc::now),
                    }),
                    Some(Err(e)) => return Err(e.into()),
                    None => {}
                }
            }
            Ok(records)
        })
        .await
    }

    async fn end_offset(&self, partition: &TopicPartition) -> Result<Offset> {
        let inner = self.inner.clone();
        let tp = partition.clone();
        blocking(move || {
            let reader = lock(&inner.reader);
            let timeout = inner.config.request_timeout;
            let (_, high) = reader.fetch_watermarks(&tp.topic, kafka_partition(&tp), timeout)?;
            Ok(Offset::new(high))
        })
        .await
    }

    async fn committed(&self, group: &str, partition: &TopicPartition) -> Result<Option<Offset>> {
        let reader = self.offset_reader(group)?;
        let timeout = self.inner.config.request_timeout;
        let tp = partition.clone();
        blocking(move || {
            let mut list = TopicPartitionList::new();
            list.add_partition(&tp.topic, kafka_partition(&tp));
            let committed = reader.committed_offsets(list, timeout)?;
            Ok(committed
                .find_partition(&tp.topic, kafka_partition(&tp))
                .and_then(|elem| match elem.offset() {
                    KafkaOffset::Offset(offset) => Some(Offset::new(offset)),
                    _ => None,
                }))
        })
        .await
    }

    async fn commit(
        &self,
        group: &str,
        member: &MemberId,
        partition: &TopicPartition,
        offset: Offset,
    ) -> Result<()> {
        let consumer = self.member_consumer(group, member, partition)?;
        let (group, member, tp) = (group.to_string(), member.clone(), partition.clone());
        blocking(move || {
            let mut list = TopicPartitionList::new();
            list.add_partition_offset(
                &tp.topic,
                kafka_partition(&tp),
                KafkaOffset::Offset(offset.as_i64()),
            )?;
            match consumer.commit(&list, CommitMode::Sync) {
                Ok(()) => Ok(()),
                // The coordinator moved the partition before we saw the rebalance.
                Err(KafkaError::ConsumerCommit(
                    RDKafkaErrorCode::IllegalGeneration
                    | RDKafkaErrorCode::UnknownMemberId
                    | RDKafkaErrorCode::RebalanceInProgress,
                )) => Err(not_assigned(&group, &member, &tp)),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn join_group(&self, group: &str, topics: &[String]) -> Result<MemberId> {
        for topic in topics {
            self.ensure_topic(topic).await?;
        }

        let consumer: BaseConsumer = self.inner.config.consumer(group).create()?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer.subscribe(&names)?;

        let n = self.inner.next_member.fetch_add(1, Ordering::Relaxed) + 1;
        let member = MemberId::new(format!("{group}-{}-{n}", std::process::id()));
        lock(&self.inner.members).insert(
            member.clone(),
            Member {
                group: group.to_string(),
                consumer: Arc::new(consumer),
                partitions: Vec::new(),
                generation: 0,
            },
        );

        tracing::info!(group, %member, ?topics, "member joined group");
        Ok(member)
    }

    async fn leave_group(&self, group: &str, member: &MemberId) -> Result<()> {
        let removed = {
            let mut members = lock(&self.inner.members);
            if !members.get(member).is_some_and(|m| m.group == group) {
                return Err(unknown_member(group, member));
            }
            members.remove(member)
        };

        if let Some(removed) = removed {
            // Closing the consumer sends the leave request and blocks until it is answered.
            blocking(move || {
                removed.consumer.unsubscribe();
                drop(removed);
                Ok(())
            })
            .await?;
        }
        tracing::info!(group, %member, "member left group");
        Ok(())
    }

    async fn assignment(&self, group: &str, member: &MemberId) -> Result<Assignment> {
        let mut members = lock(&self.inner.members);
        let entry = members
            .get_mut(member)
            .filter(|m| m.group == group)
            .ok_or_else(|| unknown_member(group, member))?;

        // Serves rebalance callbacks. Owned partitions are paused, so any
        // record returned here is one fetched before the pause and is dropped.
        if let Some(Err(e)) = entry.consumer.poll(Duration::ZERO) {
            tracing::warn!(error = %e, "group poll failed");
        }

        let current = entry.consumer.assignment()?;
        let mut partitions: Vec<TopicPartition> = current
            .elements()
            .iter()
            .map(|elem| TopicPartition::new(elem.topic(), partition_index(elem.partition())))
            .collect();
        partitions.sort();

        if partitions != entry.partitions {
            entry.consumer.pause(&current)?;
            entry.generation += 1;
            entry.partitions = partitions;
            tracing::info!(
                group,
                %member,
                generation = entry.generation,
                partitions = entry.partitions.len(),
                "assignment changed"
            );
        }

        Ok(Assignment {
            generation: entry.generation,
            partitions: entry.partitions.clone(),
        })
    }

    /// Bumped by sends through this bus only; records produced by other
    /// processes are picked up on the consumer's next poll.
    fn appends(&self) -> watch::Receiver<u64> {
        self.inner.appended.subscribe()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| BusError::Transport(format!("kafka worker failed: {e}")))?
}

fn kafka_partition(tp: &TopicPartition) -> i32 {
    i32::try_from(tp.partition).unwrap_or(i32::MAX)
}

fn partition_index(partition: i32) -> u32 {
    u32::try_from(partition).unwrap_or_default()
}

fn unknown_member(group: &str, member: &MemberId) -> BusError {
    BusError::UnknownMember {
        group: group.to_string(),
        member: member.to_string(),
    }
}

fn not_assigned(group: &str, member: &MemberId, partition: &TopicPartition) -> BusError {
    BusError::NotAssigned {
        group: group.to_string(),
        member: member.to_string(),
        partition: partition.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_settings_follow_acks() {
        let config = KafkaConfig::new("localhost:9092");
        for (acks, expected) in [(Acks::None, "0"), (Acks::Leader, "1"), (Acks::All, "all")] {
            let producer = config.producer(acks);
            assert_eq!(producer.get("acks"), Some(expected));
            assert_eq!(producer.get("partitioner"), Some("murmur2_random"));
            assert_eq!(producer.get("bootstrap.servers"), Some("localhost:9092"));
        }
    }

    #[test]
    fn consumer_settings_commit_manually_from_earliest() {
        let consumer = KafkaConfig::new("localhost:9092").consumer("cart-service");
        assert_eq!(consumer.get("group.id"), Some("cart-service"));
        assert_eq!(consumer.get("enable.auto.commit"), Some("false"));
        assert_eq!(consumer.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(consumer.get("partition.assignment.strategy"), Some("roundrobin"));
        assert_eq!(consumer.get("session.timeout.ms"), Some("6000"));
    }

    #[test]
    fn partition_numbers_convert_without_wrapping() {
        assert_eq!(partition_index(2), 2);
        assert_eq!(partition_index(-1), 0);
        assert_eq!(kafka_partition(&TopicPartition::new("t", 7)), 7);
    }
}
