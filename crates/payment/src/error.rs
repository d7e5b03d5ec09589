use common::{OrderId, PaymentId, Status};
use thiserror::Error;

use crate::PaymentStatus;

/// Errors produced by payment operations.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Payment not found: {0}")]
    NotFound(PaymentId),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The payment is not in a state that allows the requested change.
    #[error("Payment {id} is {actual}, expected {expected}")]
    InvalidState {
        id: PaymentId,
        expected: PaymentStatus,
        actual: PaymentStatus,
    },

    /// The order already has a pending or completed payment.
    #[error("Order {order_id} is already paid by {payment_id}")]
    OrderAlreadyPaid {
        order_id: OrderId,
        payment_id: PaymentId,
    },

    #[error("Payment already exists: {0}")]
    AlreadyExists(PaymentId),

    /// A stored row holds a value this build does not understand.
    #[error("Corrupt payment row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for payment operations.
pub type Result<T> = std::result::Result<T, PaymentError>;

impl From<PaymentError> for Status {
    fn from(err: PaymentError) -> Self {
        match &err {
            PaymentError::NotFound(_) => Status::not_found(err.to_string()),
            PaymentError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
            PaymentError::InvalidState { .. }
            | PaymentError::OrderAlreadyPaid { .. }
            | PaymentError::AlreadyExists(_) => {
                Status::failed_precondition(err.to_string())
            }
            PaymentError::Corrupt(_) | PaymentError::Database(_) | PaymentError::Migration(_) => {
                Status::internal(err.to_string())
            }
        }
    }
}
