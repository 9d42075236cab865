//! Structural, freshness and content policy for inbound messages.
//!
//! Checks run in a fixed order and stop at the first failure:
//!
//! 1. `sender` and `content` must be present and non-empty
//! 2. textual `content` must fit in `max_content_length` characters
//! 3. the message must be no older than `max_message_age`
//! 4. the flattened content must not contain a blocked keyword
//!
//! A message that passes is returned as a new value whose content has had
//! card-number and key-shaped substrings replaced by [`REDACTION_MARKER`].
//!
//! The two redaction patterns are heuristics. Secrets shorter than 32
//! characters slip through, and long benign identifiers are masked.

use chrono::{DateTime, TimeDelta, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::FilterConfig;
use crate::models::InboundMessage;

pub const REDACTION_MARKER: &str = "[REDACTED]";

static CARD_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").expect("card number pattern is valid"));

static KEY_SHAPED_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-zA-Z0-9_-]{32,}").expect("token pattern is valid"));

/// Why a message was rejected. The `Display` text is what the caller sees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterRejection {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Content exceeds maximum length of {max}")]
    ContentTooLong { max: usize },

    #[error("Message is too old")]
    TooOld,

    #[error("Message contains sensitive information")]
    SensitiveContent,
}

#[derive(Debug, Clone)]
pub struct MessageFilter {
    max_message_age: Duration,
    max_content_length: usize,
    /// Stored lowercased
    blocked_keywords: Vec<String>,
}

impl MessageFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            max_message_age: config.max_message_age,
            max_content_length: config.max_content_length,
            blocked_keywords: config.blocked_keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Filter a message against the current time.
    pub fn filter(&self, message: &InboundMessage) -> Result<InboundMessage, FilterRejection> {
        self.filter_at(message, Utc::now())
    }

    /// Filter a message, computing its age relative to `now`.
    pub fn filter_at(&self, message: &InboundMessage, now: DateTime<Utc>) -> Result<InboundMessage, FilterRejection> {
        self.validate_format(message, now)?;

        if self.contains_sensitive_info(&message.content) {
            tracing::warn!(sender = %message.sender, "Message contains sensitive information");
            return Err(FilterRejection::SensitiveContent);
        }

        Ok(InboundMessage {
            sender: message.sender.clone(),
            content: sanitize_content(&message.content),
            timestamp: message.timestamp,
        })
    }

    fn validate_format(&self, message: &InboundMessage, now: DateTime<Utc>) -> Result<(), FilterRejection> {
        if message.sender.is_empty() {
            return Err(FilterRejection::MissingField("sender"));
        }
        if !is_truthy(&message.content) {
            return Err(FilterRejection::MissingField("content"));
        }

        if let Value::String(text) = &message.content
            && text.chars().count() > self.max_content_length
        {
            return Err(FilterRejection::ContentTooLong {
                max: self.max_content_length,
            });
        }

        if !self.is_fresh(message.timestamp, now) {
            return Err(FilterRejection::TooOld);
        }

        Ok(())
    }

    /// Age is computed naively against `now`; clock skew is not compensated.
    fn is_fresh(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let max_age = TimeDelta::from_std(self.max_message_age).unwrap_or(TimeDelta::MAX);
        now - timestamp <= max_age
    }

    fn contains_sensitive_info(&self, content: &Value) -> bool {
        let flattened = match content {
            Value::String(text) => text.to_lowercase(),
            other => other.to_string().to_lowercase(),
        };
        self.blocked_keywords.iter().any(|keyword| flattened.contains(keyword.as_str()))
    }
}

/// Empty strings, empty collections, zero, false and null count as missing.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Replace card numbers and key-shaped tokens in a string.
pub fn redact_text(text: &str) -> String {
    let without_cards = CARD_NUMBER.replace_all(text, REDACTION_MARKER);
    KEY_SHAPED_TOKEN.replace_all(&without_cards, REDACTION_MARKER).into_owned()
}

/// Recursively redact every string inside `content`, preserving object keys
/// and array order. Always returns a new value.
pub fn sanitize_content(content: &Value) -> Value {
    match content {
        Value::String(text) => Value::String(redact_text(text)),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), sanitize_content(v))).collect()),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_content).collect()),
        scalar => scalar.clone(),
    }
}
