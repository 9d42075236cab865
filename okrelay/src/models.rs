//! Core message types passed between the pipeline stages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// A webhook notification after it has been parsed from the request body.
///
/// `content` is an arbitrary JSON value. Filtering never mutates a message in
/// place; [`crate::filter::MessageFilter::filter`] returns a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InboundMessage {
    pub sender: String,
    #[serde(default)]
    pub content: Value,
    /// Falls back to arrival time when the payload has no timestamp.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a message stamped with the current time.
    pub fn new(sender: impl Into<String>, content: Value) -> Self {
        Self {
            sender: sender.into(),
            content,
            timestamp: Utc::now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Inbound webhook body as posted by the caller.
///
/// Every field is optional at the wire level so that missing fields surface as
/// filter rejections rather than deserialization failures.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct WebhookPayload {
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WebhookPayload {
    /// Convert into a message, stamping it with `arrived_at` if the payload
    /// carried no timestamp of its own.
    pub fn into_message(self, arrived_at: DateTime<Utc>) -> InboundMessage {
        InboundMessage {
            sender: self.sender.unwrap_or_default(),
            content: self.content,
            timestamp: self.timestamp.unwrap_or(arrived_at),
        }
    }
}

/// Outcome of a call to the exchange, or a synthetic substitute produced by
/// error recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExchangeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExchangeResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_payload_without_timestamp_uses_arrival_time() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "sender": "tradingview",
            "content": {"instId": "BTC-USDT"}
        }))
        .unwrap();

        let arrived = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let message = payload.into_message(arrived);

        assert_eq!(message.sender, "tradingview");
        assert_eq!(message.timestamp, arrived);
        assert_eq!(message.content, json!({"instId": "BTC-USDT"}));
    }

    #[test]
    fn test_payload_timestamp_is_preserved() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "sender": "bot",
            "content": "hello",
            "timestamp": "2024-03-01T10:00:00Z"
        }))
        .unwrap();

        let message = payload.into_message(Utc::now());
        assert_eq!(message.timestamp, Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap());
    }

    #[test]
    fn test_missing_sender_and_content_default_to_empty() {
        let payload: WebhookPayload = serde_json::from_value(json!({})).unwrap();
        let message = payload.into_message(Utc::now());

        assert_eq!(message.sender, "");
        assert_eq!(message.content, Value::Null);
    }

    #[test]
    fn test_exchange_response_serialization_skips_empty_fields() {
        let ok = ExchangeResponse::ok(json!({"code": "0"}));
        assert!(ok.success);
        assert_eq!(serde_json::to_value(&ok).unwrap(), json!({"success": true, "data": {"code": "0"}}));
    }
}
