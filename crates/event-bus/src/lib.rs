//! Partitioned event bus used to propagate domain facts between services.
//!
//! - [`PaymentCompleted`] is the only envelope on the wire today
//! - [`Producer`] publishes with an acknowledgement policy and bounded retry
//! - [`Consumer`] is one member of a consumer group; it delivers records to an
//!   [`EventHandler`] and commits an offset only after the handler succeeds
//! - [`EventBus`] is the transport capability; [`InMemoryEventBus`] keeps the
//!   partitioned log, committed offsets and group membership in process;
//!   `KafkaEventBus` (feature `kafka`) keeps them on a broker

pub mod bus;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod handler;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod partitioner;
pub mod producer;
pub mod record;

pub use bus::{Assignment, EventBus, MemberId};
pub use consumer::{Consumer, ConsumerConfig, OffsetReset, PollSummary};
pub use envelope::{Envelope, PAYMENT_COMPLETED_TOPIC, PaymentCompleted};
pub use error::{BusError, HandlerError, Result};
pub use handler::EventHandler;
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaEventBus};
pub use memory::InMemoryEventBus;
pub use partitioner::partition_for_key;
pub use producer::{Acks, Producer, ProducerConfig};
pub use record::{Offset, OutboundRecord, Record, RecordMetadata, TopicPartition};
