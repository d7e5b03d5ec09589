use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{Offset, OutboundRecord, Record, RecordMetadata, Result, TopicPartition};
use crate::producer::Acks;

/// Identity of one member of a consumer group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Partitions owned by a member for one group generation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Assignment {
    /// Bumped on every membership change of the group.
    pub generation: u64,
    pub partitions: Vec<TopicPartition>,
}

/// Transport capability behind producers and consumers.
///
/// Holds the partitioned log, per-group committed offsets and group
/// membership. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Appends a record to the partition chosen from its key.
    ///
    /// Returns once the record is acknowledged according to `acks`.
    async fn send(&self, record: OutboundRecord, acks: Acks) -> Result<RecordMetadata>;

    /// Number of partitions of a topic, creating the topic if needed.
    async fn partition_count(&self, topic: &str) -> Result<u32>;

    /// Reads up to `max` records of a partition starting at `from`.
    ///
    /// Records are returned in offset order.
    async fn fetch(&self, partition: &TopicPartition, from: Offset, max: usize)
    -> Result<Vec<Record>>;

    /// Offset the next appended record of the partition will get.
    async fn end_offset(&self, partition: &TopicPartition) -> Result<Offset>;

    /// Last committed offset of the group for the partition, if any.
    async fn committed(&self, group: &str, partition: &TopicPartition) -> Result<Option<Offset>>;

    /// Commits `offset` (the next record to read) for the partition.
    ///
    /// Fails with `NotAssigned` when the member does not currently own it.
    async fn commit(
        &self,
        group: &str,
        member: &MemberId,
        partition: &TopicPartition,
        offset: Offset,
    ) -> Result<()>;

    /// Adds a member to the group and rebalances partition ownership.
    async fn join_group(&self, group: &str, topics: &[String]) -> Result<MemberId>;

    /// Removes a member from the group and rebalances partition ownership.
    async fn leave_group(&self, group: &str, member: &MemberId) -> Result<()>;

    /// Current partition ownership of a member.
    async fn assignment(&self, group: &str, member: &MemberId) -> Result<Assignment>;

    /// Sequence bumped after every append this bus observes.
    ///
    /// A consumer marks the current value seen before it fetches, then waits
    /// for `changed()`, so an append racing the fetch still wakes it.
    fn appends(&self) -> watch::Receiver<u64>;
}

#[async_trait]
impl<B: EventBus + ?Sized> EventBus for Arc<B> {
    async fn send(&self, record: OutboundRecord, acks: Acks) -> Result<RecordMetadata> {
        (**self).send(record, acks).await
    }

    async fn partition_count(&self, topic: &str) -> Result<u32> {
        (**self).partition_count(topic).await
    }

    async fn fetch(
        &self,
        partition: &TopicPartition,
        from: Offset,
        max: usize,
    ) -> Result<Vec<Record>> {
        (**self).fetch(partition, from, max).await
    }

    async fn end_offset(&self, partition: &TopicPartition) -> Result<Offset> {
        (**self).end_offset(partition).await
    }

    async fn committed(&self, group: &str, partition: &TopicPartition) -> Result<Option<Offset>> {
        (**self).committed(group, partition).await
    }

    async fn commit(
        &self,
        group: &str,
        member: &MemberId,
        partition: &TopicPartition,
        offset: Offset,
    ) -> Result<()> {
        (**self).commit(group, member, partition, offset).await
    }

    async fn join_group(&self, group: &str, topics: &[String]) -> Result<MemberId> {
        (**self).join_group(group, topics).await
    }

    async fn leave_group(&self, group: &str, member: &MemberId) -> Result<()> {
        (**self).leave_group(group, member).await
    }

    async fn assignment(&self, group: &str, member: &MemberId) -> Result<Assignment> {
        (**self).assignment(group, member).await
    }

    fn appends(&self) -> watch::Receiver<u64> {
        (**self).appends()
    }
}
