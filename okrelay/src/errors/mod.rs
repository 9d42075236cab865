//! Classified failures and their mapping onto HTTP responses.
//!
//! Every failure raised after a message passes filtering is a
//! [`ClassifiedError`]. It carries an [`ErrorKind`] that drives the status code
//! mapping and the recovery policy in [`classifier::ErrorClassifier`].

pub mod classifier;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error as ThisError;

use crate::filter::{FilterRejection, redact_text};

pub use classifier::{ErrorClassifier, ErrorFrequencyTable};

/// Failure categories, checked most specific first when mapping to a status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Bad input shape or policy violation
    Validation,
    /// Transport-level failure talking to the exchange
    Network,
    /// The exchange rejected the call, or retries were exhausted
    ApiFailure,
    /// Signature or authorization failure
    Security,
    /// Anything unclassified
    Internal,
}

impl ErrorKind {
    pub fn status_code(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Network => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::ApiFailure => StatusCode::BAD_GATEWAY,
            ErrorKind::Security => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Name reported to callers in the `error` field of a classification detail.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::Validation => "ValidationError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::ApiFailure => "APIError",
            ErrorKind::Security => "SecurityError",
            ErrorKind::Internal => "InternalServerError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A tagged failure. Logged as soon as it is created.
#[derive(ThisError, Debug, Clone)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: Map<String, Value>,
    pub occurred_at: DateTime<Utc>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::with_context(kind, message, Map::new())
    }

    pub fn with_context(kind: ErrorKind, message: impl Into<String>, context: Map<String, Value>) -> Self {
        let error = Self {
            kind,
            message: message.into(),
            context,
            occurred_at: Utc::now(),
        };
        let context = Value::Object(error.context.clone());
        tracing::error!(
            error_type = %error.kind,
            error_message = %error.message,
            %context,
            timestamp = %error.occurred_at.to_rfc3339(),
            "Error occurred"
        );
        error
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn api_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ApiFailure, message)
    }

    pub fn security(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Returns a caller-safe message: internal failures are replaced by a
    /// generic text and key-shaped substrings are redacted from the rest.
    pub fn user_message(&self) -> String {
        match self.kind {
            ErrorKind::Internal => "An unexpected error occurred".to_string(),
            _ => redact_text(&self.message),
        }
    }
}

impl From<FilterRejection> for ClassifiedError {
    fn from(rejection: FilterRejection) -> Self {
        ClassifiedError::validation(rejection.to_string())
    }
}

/// Error body for failures that happen before a message envelope exists.
///
/// Serialized as `{"status": "error", "detail": ...}`.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub detail: Value,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, detail: impl Into<Value>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        match self.status {
            s if s.is_server_error() => tracing::error!(status = %s, detail = %self.detail, "Request failed"),
            s => tracing::warn!(status = %s, detail = %self.detail, "Request rejected"),
        }

        (self.status, Json(json!({ "status": "error", "detail": self.detail }))).into_response()
    }
}
