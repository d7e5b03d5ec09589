use common::{Status, UserId};
use thiserror::Error;

/// Errors produced by cart operations.
#[derive(Debug, Error)]
pub enum CartError {
    /// Items must be added with a positive quantity.
    #[error("Quantity must be positive, got {0}")]
    InvalidQuantity(i64),

    /// The backing key-value store failed.
    #[error("Cart store error for user {user_id}: {reason}")]
    Store { user_id: UserId, reason: String },

    /// A stored cart could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cart operations.
pub type Result<T> = std::result::Result<T, CartError>;

impl From<CartError> for Status {
    fn from(err: CartError) -> Self {
        match err {
            CartError::InvalidQuantity(_) => Status::invalid_argument(err.to_string()),
            CartError::Store { .. } | CartError::Serialization(_) => {
                Status::internal(err.to_string())
            }
        }
    }
}
