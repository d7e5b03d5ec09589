use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PaymentError, Result};

/// Lifecycle of a payment: pending, then completed, then optionally refunded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// The only state each status may move to.
    pub fn next(&self) -> Option<PaymentStatus> {
        match self {
            PaymentStatus::Pending => Some(PaymentStatus::Completed),
            PaymentStatus::Completed => Some(PaymentStatus::Refunded),
            PaymentStatus::Refunded => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(PaymentError::Corrupt(format!("unknown status {other:?}"))),
        }
    }
}

/// Card details as submitted. Never stored or logged as-is.
#[derive(Clone, Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub holder: String,
    pub expiry: String,
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &"<redacted>")
            .field("holder", &self.holder)
            .field("expiry", &self.expiry)
            .finish()
    }
}

impl CardDetails {
    /// Validates the number and keeps only what may be retained.
    pub fn to_metadata(&self) -> Result<CardMetadata> {
        let digits: String = self
            .number
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .collect();

        if !(12..=19).contains(&digits.len()) || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(PaymentError::InvalidArgument(
                "card number must be 12 to 19 digits".to_string(),
            ));
        }

        Ok(CardMetadata {
            holder: self.holder.trim().to_string(),
            last4: digits[digits.len() - 4..].to_string(),
            expiry: self.expiry.trim().to_string(),
        })
    }
}

/// The card data a payment keeps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardMetadata {
    pub holder: String,
    pub last4: String,
    pub expiry: String,
}

impl CardMetadata {
    /// `**** **** **** 4242`
    pub fn masked_number(&self) -> String {
        format!("**** **** **** {}", self.last4)
    }
}

/// A request to charge an order.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentRequest {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub payment_method: String,
    #[serde(default)]
    pub card: Option<CardDetails>,
}

impl PaymentRequest {
    pub fn validate(&self) -> Result<()> {
        if self.order_id.is_empty() {
            return Err(PaymentError::InvalidArgument("order_id is required".into()));
        }
        if self.user_id.is_empty() {
            return Err(PaymentError::InvalidArgument("user_id is required".into()));
        }
        if !self.amount.is_positive() {
            return Err(PaymentError::InvalidArgument(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }
        if self.currency.trim().is_empty() {
            return Err(PaymentError::InvalidArgument("currency is required".into()));
        }
        if self.payment_method.trim().is_empty() {
            return Err(PaymentError::InvalidArgument(
                "payment_method is required".into(),
            ));
        }
        Ok(())
    }
}

/// A stored payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub user_id: UserId,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card: Option<CardMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_id: Option<RefundId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// A new pending payment with a fresh `pay_` id.
    pub fn pending(request: &PaymentRequest, card: Option<CardMetadata>) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::generate(),
            order_id: request.order_id.clone(),
            user_id: request.user_id.clone(),
            amount: request.amount,
            currency: request.currency.trim().to_uppercase(),
            status: PaymentStatus::Pending,
            payment_method: request.payment_method.clone(),
            card,
            refund_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// Identifier of a refund, `ref_<uuid>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefundId(String);

impl RefundId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("ref_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RefundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a refund.
#[derive(Debug, Clone, Serialize)]
pub struct Refund {
    pub refund_id: RefundId,
    pub payment: Payment,
}
