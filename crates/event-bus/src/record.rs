use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Position of a record within one partition.
///
/// Offsets are dense and start at 0 for the first record of a partition.
/// A committed offset names the next record to read, not the last one read.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(i64);

impl Offset {
    /// Creates an offset from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The oldest position of any partition.
    pub fn earliest() -> Self {
        Self(0)
    }

    /// Returns the offset that follows this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw offset value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Offset {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A topic name paired with one of its partitions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: u32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl std::fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// A record handed to the transport by a producer.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Where an accepted record landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordMetadata {
    pub partition: u32,
    pub offset: Offset,
}

/// A record stored in a partition.
#[derive(Debug, Clone)]
pub struct Record {
    pub topic: String,
    pub partition: u32,
    pub offset: Offset,
    pub key: String,
    pub payload: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn topic_partition(&self) -> TopicPartition {
        TopicPartition::new(self.topic.clone(), self.partition)
    }
}
