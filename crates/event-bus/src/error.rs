use thiserror::Error;

use crate::TopicPartition;

/// Errors that can occur when interacting with the event bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The transport could not accept or serve the request.
    /// Producers retry these.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Publishing gave up after exhausting its retries.
    #[error("Publish to {topic} failed after {attempts} attempts: {reason}")]
    PublishFailed {
        topic: String,
        attempts: u32,
        reason: String,
    },

    /// The partition does not exist on the topic.
    #[error("Unknown partition: {0}")]
    UnknownPartition(TopicPartition),

    /// The member is not (or no longer) part of the group.
    #[error("Unknown member {member} in group {group}")]
    UnknownMember { group: String, member: String },

    /// A member tried to commit for a partition it does not own.
    #[error("Member {member} of group {group} does not own {partition}")]
    NotAssigned {
        group: String,
        member: String,
        partition: TopicPartition,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for BusError {
    fn from(e: rdkafka::error::KafkaError) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Result type for event bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Error returned by an event handler.
///
/// Returning it leaves the record uncommitted, so it will be delivered again.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<common::Status> for HandlerError {
    fn from(status: common::Status) -> Self {
        Self::new(status.to_string())
    }
}
