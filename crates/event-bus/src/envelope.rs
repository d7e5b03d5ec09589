//! Domain facts published on the bus.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// Topic carrying [`PaymentCompleted`] envelopes.
pub const PAYMENT_COMPLETED_TOPIC: &str = "payment-completed";

/// A fact that can be published to its own topic.
pub trait Envelope: Serialize + DeserializeOwned + Send + Sync {
    /// Topic the envelope is published to.
    const TOPIC: &'static str;

    /// Key used to pick the partition. Envelopes with equal keys are ordered.
    fn partition_key(&self) -> &str;
}

/// A payment was captured.
///
/// Immutable once published. `payment_id` is both its identity and its
/// partition key; envelopes of different payments carry no relative order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompleted {
    pub payment_id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub payment_method: String,
    pub completed_at: DateTime<Utc>,
}

impl Envelope for PaymentCompleted {
    const TOPIC: &'static str = PAYMENT_COMPLETED_TOPIC;

    fn partition_key(&self) -> &str {
        self.payment_id.as_str()
    }
}
