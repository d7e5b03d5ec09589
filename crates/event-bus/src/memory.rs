use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{RwLock, watch};

use crate::bus::{Assignment, EventBus, MemberId};
use crate::partitioner::partition_for_key;
use crate::producer::Acks;
use crate::{BusError, Offset, OutboundRecord, Record, RecordMetadata, Result, TopicPartition};

const DEFAULT_PARTITIONS: u32 = 3;

#[derive(Debug, Default)]
struct GroupState {
    generation: u64,
    /// Members in join order with their subscribed topics.
    members: Vec<(MemberId, Vec<String>)>,
    assignments: HashMap<MemberId, Vec<TopicPartition>>,
}

impl GroupState {
    fn subscribes_to(&self, topic: &str) -> bool {
        self.members
            .iter()
            .any(|(_, topics)| topics.iter().any(|t| t == topic))
    }

    /// Round-robin assignment: partitions sorted by (topic, partition) are
    /// dealt one at a time to the members subscribed to that topic.
    fn rebalance(&mut self, topics: &BTreeMap<String, Vec<Vec<Record>>>) {
        self.generation += 1;
        self.assignments = self
            .members
            .iter()
            .map(|(member, _)| (member.clone(), Vec::new()))
            .collect();

        let mut subscribed: Vec<String> = self
            .members
            .iter()
            .flat_map(|(_, topics)| topics.iter().cloned())
            .collect();
        subscribed.sort();
        subscribed.dedup();

        let mut cursor = 0usize;
        for topic in subscribed {
            let Some(partitions) = topics.get(&topic) else {
                continue;
            };
            let owners: Vec<MemberId> = self
                .members
                .iter()
                .filter(|(_, topics)| topics.contains(&topic))
                .map(|(member, _)| member.clone())
                .collect();
            if owners.is_empty() {
                continue;
            }
            for partition in 0..partitions.len() as u32 {
                let owner = &owners[cursor % owners.len()];
                cursor += 1;
                if let Some(owned) = self.assignments.get_mut(owner) {
                    owned.push(TopicPartition::new(topic.clone(), partition));
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    topics: BTreeMap<String, Vec<Vec<Record>>>,
    committed: HashMap<(String, TopicPartition), Offset>,
    groups: HashMap<String, GroupState>,
    next_member: u64,
    failing_sends: u32,
    last_acks: Option<Acks>,
}

impl BusState {
    /// Creates the topic if missing and rebalances the groups that wait on it.
    fn ensure_topic(&mut self, topic: &str, partitions: u32) {
        if self.topics.contains_key(topic) {
            return;
        }
        self.topics.insert(
            topic.to_string(),
            (0..partitions.max(1)).map(|_| Vec::new()).collect(),
        );
        tracing::debug!(topic, partitions, "topic created");

        for group in self.groups.values_mut() {
            if group.subscribes_to(topic) {
                group.rebalance(&self.topics);
            }
        }
    }

    fn partition_log(&self, tp: &TopicPartition) -> Result<&Vec<Record>> {
        self.topics
            .get(&tp.topic)
            .and_then(|partitions| partitions.get(tp.partition as usize))
            .ok_or_else(|| BusError::UnknownPartition(tp.clone()))
    }

    fn group(&self, group: &str, member: &MemberId) -> Result<&GroupState> {
        self.groups
            .get(group)
            .filter(|g| g.assignments.contains_key(member))
            .ok_or_else(|| BusError::UnknownMember {
                group: group.to_string(),
                member: member.to_string(),
            })
    }
}

/// In-memory event bus.
///
/// Keeps every record for the life of the process, so the oldest retained
/// offset of each partition is always 0. Topics are created on first use with
/// the configured partition count. Shared by cloning.
#[derive(Clone)]
pub struct InMemoryEventBus {
    state: Arc<RwLock<BusState>>,
    appended: Arc<watch::Sender<u64>>,
    partitions: u32,
}

impl InMemoryEventBus {
    /// Creates an empty bus with three partitions per topic.
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    /// Creates an empty bus whose topics get `partitions` partitions.
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(BusState::default())),
            appended: Arc::new(watch::Sender::new(0)),
            partitions: partitions.max(1),
        }
    }

    /// Makes the next `count` sends fail with a transport error.
    pub async fn fail_next_sends(&self, count: u32) {
        self.state.write().await.failing_sends = count;
    }

    /// Total number of records stored on a topic.
    pub async fn record_count(&self, topic: &str) -> usize {
        self.state
            .read()
            .await
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Acknowledgement policy of the most recent successful send.
    pub async fn last_acks(&self) -> Option<Acks> {
        self.state.read().await.last_acks
    }

    /// Current generation of a group, 0 if it never had members.
    pub async fn generation(&self, group: &str) -> u64 {
        self.state
            .read()
            .await
            .groups
            .get(group)
            .map(|g| g.generation)
            .unwrap_or(0)
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn send(&self, record: OutboundRecord, acks: Acks) -> Result<RecordMetadata> {
        let metadata = {
            let mut state = self.state.write().await;

            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                return Err(BusError::Transport(
                    "broker not available (injected)".to_string(),
                ));
            }

            state.last_acks = Some(acks);
            state.ensure_topic(&record.topic, self.partitions);
            let partitions = state.topics.get_mut(&record.topic).ok_or_else(|| {
                BusError::UnknownPartition(TopicPartition::new(record.topic.clone(), 0))
            })?;
            let partition = partition_for_key(&record.key, partitions.len() as u32);
            let log = &mut partitions[partition as usize];
            let offset = Offset::new(log.len() as i64);

            log.push(Record {
                topic: record.topic,
                partition,
                offset,
                key: record.key,
                payload: record.payload,
                timestamp: Utc::now(),
            });

            RecordMetadata { partition, offset }
        };

        tracing::trace!(?acks, partition = metadata.partition, offset = %metadata.offset, "record appended");
        self.appended.send_modify(|seq| *seq = seq.wrapping_add(1));
        Ok(metadata)
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        let mut state = self.state.write().await;
        state.ensure_topic(topic, self.partitions);
        Ok(state.topics.get(topic).map(|p| p.len() as u32).unwrap_or(0))
    }

    async fn fetch(
        &self,
        partition: &TopicPartition,
        from: Offset,
        max: usize,
    ) -> Result<Vec<Record>> {
        let state = self.state.read().await;
        let log = state.partition_log(partition)?;
        let start = from.as_i64().max(0) as usize;
        Ok(log.iter().skip(start).take(max).cloned().collect())
    }

    async fn end_offset(&self, partition: &TopicPartition) -> Result<Offset> {
        let state = self.state.read().await;
        let log = state.partition_log(partition)?;
        Ok(Offset::new(log.len() as i64))
    }

    async fn committed(&self, group: &str, partition: &TopicPartition) -> Result<Option<Offset>> {
        let state = self.state.read().await;
        Ok(state
            .committed
            .get(&(group.to_string(), partition.clone()))
            .copied())
    }

    async fn commit(
        &self,
        group: &str,
        member: &MemberId,
        partition: &TopicPartition,
        offset: Offset,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let owns = state
            .group(group, member)?
            .assignments
            .get(member)
            .is_some_and(|owned| owned.contains(partition));
        if !owns {
            return Err(BusError::NotAssigned {
                group: group.to_string(),
                member: member.to_string(),
                partition: partition.clone(),
            });
        }

        state
            .committed
            .insert((group.to_string(), partition.clone()), offset);
        Ok(())
    }

    async fn join_group(&self, group: &str, topics: &[String]) -> Result<MemberId> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        for topic in topics {
            state.ensure_topic(topic, self.partitions);
        }

        state.next_member += 1;
        let member = MemberId::new(format!("{group}-member-{}", state.next_member));

        let group_state = state.groups.entry(group.to_string()).or_default();
        group_state
            .members
            .push((member.clone(), topics.to_vec()));
        group_state.rebalance(&state.topics);

        tracing::info!(group, %member, generation = group_state.generation, "member joined group");
        Ok(member)
    }

    async fn leave_group(&self, group: &str, member: &MemberId) -> Result<()> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let group_state = state
            .groups
            .get_mut(group)
            .filter(|g| g.members.iter().any(|(m, _)| m == member))
            .ok_or_else(|| BusError::UnknownMember {
                group: group.to_string(),
                member: member.to_string(),
            })?;

        group_state.members.retain(|(m, _)| m != member);
        group_state.rebalance(&state.topics);

        tracing::info!(group, %member, generation = group_state.generation, "member left group");
        Ok(())
    }

    async fn assignment(&self, group: &str, member: &MemberId) -> Result<Assignment> {
        let state = self.state.read().await;
        let group_state = state.group(group, member)?;
        Ok(Assignment {
            generation: group_state.generation,
            partitions: group_state
                .assignments
                .get(member)
                .cloned()
                .unwrap_or_default(),
        })
    }

    fn appends(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }
}
