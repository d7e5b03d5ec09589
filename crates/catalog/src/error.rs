use common::{ProductId, Status};
use thiserror::Error;

/// Errors produced by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Product not found: {0}")]
    NotFound(ProductId),

    /// A request field was out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The stock operation was neither `add` nor `subtract`.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Subtracting would take stock below zero.
    #[error("Insufficient stock for {product_id}: available {available}, requested {requested}")]
    InsufficientStock {
        product_id: ProductId,
        available: i64,
        requested: i64,
    },

    /// A product with this id already exists.
    #[error("Product already exists: {0}")]
    AlreadyExists(ProductId),

    /// The in-memory store was used outside its locking protocol.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for catalog operations.
pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    /// True for rejections caused by the request rather than the store.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            CatalogError::NotFound(_)
                | CatalogError::InvalidArgument(_)
                | CatalogError::InvalidOperation(_)
                | CatalogError::InsufficientStock { .. }
                | CatalogError::AlreadyExists(_)
        )
    }
}

impl From<CatalogError> for Status {
    fn from(err: CatalogError) -> Self {
        match &err {
            CatalogError::NotFound(_) => Status::not_found(err.to_string()),
            CatalogError::InvalidArgument(_) | CatalogError::InvalidOperation(_) => {
                Status::invalid_argument(err.to_string())
            }
            CatalogError::InsufficientStock { .. } | CatalogError::AlreadyExists(_) => {
                Status::failed_precondition(err.to_string())
            }
            CatalogError::Store(_) | CatalogError::Database(_) | CatalogError::Migration(_) => {
                Status::internal(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Code;

    #[test]
    fn maps_to_status_codes() {
        let cases = [
            (CatalogError::NotFound(ProductId::new("p1")), Code::NotFound),
            (
                CatalogError::InvalidOperation("multiply".into()),
                Code::InvalidArgument,
            ),
            (
                CatalogError::InsufficientStock {
                    product_id: ProductId::new("p1"),
                    available: 5,
                    requested: 10,
                },
                Code::FailedPrecondition,
            ),
            (CatalogError::Store("lock".into()), Code::Internal),
        ];

        for (err, code) in cases {
            assert_eq!(Status::from(err).code, code);
        }
    }

    #[test]
    fn store_errors_are_not_rejections() {
        assert!(!CatalogError::Store("x".into()).is_rejection());
        assert!(CatalogError::InvalidOperation("x".into()).is_rejection());
    }
}
