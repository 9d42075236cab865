//! Response envelope construction and response-side redaction.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::filter::REDACTION_MARKER;
use crate::models::{ExchangeResponse, InboundMessage};

/// Key substrings whose values never leave the service.
pub const SENSITIVE_FIELDS: [&str; 8] = [
    "key",
    "secret",
    "password",
    "token",
    "credential",
    "apiKey",
    "secretKey",
    "passphrase",
];

const UNKNOWN_SENDER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ProcessingResult {
    pub success: bool,
    pub error_message: Option<String>,
}

/// Body returned to the webhook caller once a message has been parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Envelope {
    /// Time the envelope was built (RFC 3339)
    pub timestamp: String,
    /// Derived from sender and message timestamp, see [`request_id`]
    pub request_id: Uuid,
    pub status: EnvelopeStatus,
    pub sender: String,
    pub processing_result: ProcessingResult,
    /// Sanitized upstream body, or `null`
    pub okx_response: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ResponseFormatter {
    /// Stored lowercased
    sensitive_fields: Vec<String>,
}

impl Default for ResponseFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseFormatter {
    pub fn new() -> Self {
        Self {
            sensitive_fields: SENSITIVE_FIELDS.iter().map(|f| f.to_lowercase()).collect(),
        }
    }

    pub fn format(
        &self,
        message: Option<&InboundMessage>,
        exchange_response: Option<&ExchangeResponse>,
        success: bool,
        error: Option<&str>,
    ) -> Envelope {
        let sender = message
            .map(|m| m.sender.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_SENDER)
            .to_string();
        let request_id = request_id(&sender, message);

        let envelope = Envelope {
            timestamp: Utc::now().to_rfc3339(),
            request_id,
            status: if success { EnvelopeStatus::Success } else { EnvelopeStatus::Error },
            sender,
            processing_result: ProcessingResult {
                success,
                error_message: error.map(str::to_string),
            },
            okx_response: exchange_response.and_then(|r| r.data.as_ref()).map(|data| self.sanitize(data)),
        };

        if success {
            tracing::info!(status = "success", sender = %envelope.sender, request_id = %envelope.request_id, "Request processed");
        } else {
            tracing::error!(status = "error", sender = %envelope.sender, request_id = %envelope.request_id, "Request processed");
            if let Some(error) = error {
                tracing::error!(request_id = %envelope.request_id, "Error details: {}", error);
            }
        }

        envelope
    }

    /// Replace the value of every sensitive key, at any depth.
    pub fn sanitize(&self, response: &Value) -> Value {
        match response {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, value)| {
                        let value = if self.is_sensitive(key) {
                            Value::String(REDACTION_MARKER.to_string())
                        } else {
                            self.sanitize(value)
                        };
                        (key.clone(), value)
                    })
                    .collect::<Map<_, _>>(),
            ),
            Value::Array(items) => Value::Array(items.iter().map(|item| self.sanitize(item)).collect()),
            other => other.clone(),
        }
    }

    fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.sensitive_fields.iter().any(|field| key.contains(field.as_str()))
    }

    pub fn log_request_details(&self, message: &InboundMessage, endpoint: &str) {
        tracing::info!(
            sender = %message.sender,
            message_timestamp = %message.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            endpoint,
            "Processing request"
        );
    }

    pub fn log_response_metrics(&self, elapsed: Duration) {
        tracing::info!(elapsed_seconds = elapsed.as_secs_f64(), "Response time: {:.3}s", elapsed.as_secs_f64());
    }
}

/// Name-based id over `"<sender>|<message timestamp>"`.
///
/// Identical inputs give identical ids. Without a message the current time is
/// used, so the id is not reproducible.
pub fn request_id(sender: &str, message: Option<&InboundMessage>) -> Uuid {
    let timestamp = message.map(|m| m.timestamp).unwrap_or_else(Utc::now);
    let name = format!("{sender}|{}", timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true));
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}
