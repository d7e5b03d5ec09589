//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cart::CartError;
use catalog::CatalogError;
use common::{Code, Status};
use payment::PaymentError;

/// Failure while wiring services at process start.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database connection failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("catalog store setup failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("redis connection failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("event bus setup failed: {0}")]
    Bus(#[from] event_bus::BusError),

    #[error("KAFKA_BROKERS is set but shop was built without the 'kafka' feature")]
    KafkaDisabled,
}

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// A service call failed with a status code.
    Service(Status),
    /// The request body or query string could not be decoded.
    BadRequest(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Service(status) => code_to_http(status.code),
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// NotFound 404, InvalidArgument 400, FailedPrecondition 409,
/// Unavailable 503, anything else 500.
pub fn code_to_http(code: Code) -> StatusCode {
    match code {
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::FailedPrecondition => StatusCode::CONFLICT,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self {
            ApiError::Service(s) => {
                if s.code == Code::Internal {
                    tracing::error!(error = %s.message, "internal server error");
                }
                s.message
            }
            ApiError::BadRequest(msg) => msg,
        };

        let body = serde_json::json!({ "success": false, "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<Status> for ApiError {
    fn from(status: Status) -> Self {
        ApiError::Service(status)
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Service(err.into())
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        ApiError::Service(err.into())
    }
}

impl From<CartError> for ApiError {
    fn from(err: CartError) -> Self {
        ApiError::Service(err.into())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ProductId;

    #[test]
    fn codes_map_to_http_statuses() {
        let cases = [
            (Code::NotFound, StatusCode::NOT_FOUND),
            (Code::InvalidArgument, StatusCode::BAD_REQUEST),
            (Code::FailedPrecondition, StatusCode::CONFLICT),
            (Code::Unavailable, StatusCode::SERVICE_UNAVAILABLE),
            (Code::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (code, expected) in cases {
            assert_eq!(code_to_http(code), expected);
        }
    }

    #[test]
    fn insufficient_stock_is_a_conflict() {
        let err = ApiError::from(CatalogError::InsufficientStock {
            product_id: ProductId::new("p1"),
            available: 1,
            requested: 5,
        });
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
    }

    #[test]
    fn invalid_cart_quantity_is_bad_request() {
        let err = ApiError::from(CartError::InvalidQuantity(0));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
