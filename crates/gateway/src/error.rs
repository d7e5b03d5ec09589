//! Gateway errors and their HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The upstream could not be reached or did not answer in time.
    #[error("upstream {upstream} unreachable: {source}")]
    Upstream {
        upstream: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The client request body could not be read.
    #[error("failed to read request body: {0}")]
    RequestBody(#[from] axum::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Upstream { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::RequestBody(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let message = match &self {
            GatewayError::Upstream { .. } => {
                tracing::warn!(error = %self, "proxy error");
                "Service unavailable".to_string()
            }
            GatewayError::RequestBody(_) => self.to_string(),
        };

        let body = serde_json::json!({ "success": false, "error": message });
        (self.status_code(), axum::Json(body)).into_response()
    }
}
