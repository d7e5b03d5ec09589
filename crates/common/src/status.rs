//! Status codes returned across the service (RPC) boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure class of a service call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    NotFound,
    InvalidArgument,
    FailedPrecondition,
    Unavailable,
    Internal,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Code::NotFound => "not_found",
            Code::InvalidArgument => "invalid_argument",
            Code::FailedPrecondition => "failed_precondition",
            Code::Unavailable => "unavailable",
            Code::Internal => "internal",
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status code plus a human readable message.
///
/// Every service error converts into this at the service boundary; the HTTP
/// layer maps the code onto a response status.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct Status {
    pub code: Code,
    pub message: String,
}

impl Status {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(Code::FailedPrecondition, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(Code::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_display_includes_code_and_message() {
        let status = Status::not_found("product p1 not found");
        assert_eq!(status.to_string(), "not_found: product p1 not found");
    }

    #[test]
    fn code_serializes_snake_case() {
        let json = serde_json::to_string(&Code::FailedPrecondition).unwrap();
        assert_eq!(json, "\"failed_precondition\"");
    }
}
