//! Status-code mapping, frequency tracking and best-effort recovery.
//!
//! One [`ErrorClassifier`] is created at startup and shared through
//! [`crate::AppState`]. Its [`ErrorFrequencyTable`] is the only mutable state
//! shared between concurrent requests.

use axum::http::StatusCode;
use chrono::Utc;
use dashmap::DashMap;
use metrics::counter;
use serde_json::{Map, Value, json};

use crate::errors::{ClassifiedError, ErrorKind};
use crate::models::ExchangeResponse;

/// Per-kind running error counts.
///
/// A count that reaches the threshold fires an alert and resets to zero. This
/// only gates a log line; it never blocks calls.
#[derive(Debug)]
pub struct ErrorFrequencyTable {
    counts: DashMap<ErrorKind, u32>,
    threshold: u32,
}

impl ErrorFrequencyTable {
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: DashMap::new(),
            threshold: threshold.max(1),
        }
    }

    /// Count one occurrence of `kind`. Returns `true` if this occurrence
    /// reached the threshold (the count has then been reset).
    pub fn record(&self, kind: ErrorKind) -> bool {
        // The entry guard holds the shard lock, so concurrent increments of
        // the same kind are serialized.
        let mut count = self.counts.entry(kind).or_insert(0);
        *count += 1;
        if *count >= self.threshold {
            *count = 0;
            true
        } else {
            false
        }
    }

    pub fn count(&self, kind: ErrorKind) -> u32 {
        self.counts.get(&kind).map(|c| *c).unwrap_or(0)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}

#[derive(Debug)]
pub struct ErrorClassifier {
    frequencies: ErrorFrequencyTable,
}

impl ErrorClassifier {
    pub fn new(alert_threshold: u32) -> Self {
        Self {
            frequencies: ErrorFrequencyTable::new(alert_threshold),
        }
    }

    pub fn frequencies(&self) -> &ErrorFrequencyTable {
        &self.frequencies
    }

    /// Map an error to its transport status code and a structured detail,
    /// counting the occurrence against its kind.
    pub fn classify_and_map(&self, error: &ClassifiedError, context: Option<Map<String, Value>>) -> (StatusCode, Value) {
        let kind = error.kind;
        counter!("okrelay_classified_errors_total", "kind" => kind.name()).increment(1);

        if self.frequencies.record(kind) {
            counter!("okrelay_error_threshold_alerts_total", "kind" => kind.name()).increment(1);
            tracing::error!(
                alert = "error_threshold",
                error_type = %kind,
                threshold = self.frequencies.threshold(),
                "Error threshold reached for {}. Occurred {} times.",
                kind,
                self.frequencies.threshold()
            );
        }

        let timestamp = Utc::now().to_rfc3339();
        let detail = match kind {
            ErrorKind::Internal => {
                tracing::error!(error_message = %error.message, context = ?context, "Unexpected error");
                json!({
                    "error": kind.name(),
                    "message": error.user_message(),
                    "timestamp": timestamp,
                })
            }
            _ => json!({
                "error": kind.name(),
                "message": error.user_message(),
                "timestamp": timestamp,
                "context": Value::Object(context.unwrap_or_default()),
            }),
        };

        (kind.status_code(), detail)
    }

    /// Try to turn a failure into a degraded success.
    ///
    /// Network failures yield a "cached" marker, API failures a "fallback"
    /// marker. Every other kind has no recovery.
    pub fn attempt_recovery(&self, error: &ClassifiedError) -> Option<ExchangeResponse> {
        let (status, message) = match error.kind {
            ErrorKind::Network => ("cached", "Using cached response"),
            ErrorKind::ApiFailure => ("fallback", "Using fallback response"),
            _ => return None,
        };

        tracing::info!(error_type = %error.kind, recovery = status, "Recovered from error with synthetic response");
        Some(ExchangeResponse::ok(json!({ "status": status, "message": message })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_classify_maps_every_kind() {
        let classifier = ErrorClassifier::new(5);

        let cases = [
            (ClassifiedError::api_failure("API timeout"), StatusCode::BAD_GATEWAY),
            (ClassifiedError::validation("Invalid format"), StatusCode::BAD_REQUEST),
            (ClassifiedError::network("Connection failed"), StatusCode::SERVICE_UNAVAILABLE),
            (ClassifiedError::security("Invalid signature"), StatusCode::UNAUTHORIZED),
            (ClassifiedError::internal("oops"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, expected) in cases {
            let (status, _) = classifier.classify_and_map(&error, None);
            assert_eq!(status, expected, "wrong status for {:?}", error.kind);
        }
    }

    #[test]
    fn test_detail_shape() {
        let classifier = ErrorClassifier::new(5);
        let mut context = Map::new();
        context.insert("endpoint".to_string(), json!("OKX API"));

        let (_, detail) = classifier.classify_and_map(&ClassifiedError::api_failure("HTTP error: 500"), Some(context));
        assert_eq!(detail["error"], "APIError");
        assert_eq!(detail["message"], "HTTP error: 500");
        assert_eq!(detail["context"]["endpoint"], "OKX API");
        assert!(detail["timestamp"].is_string());

        let (_, detail) = classifier.classify_and_map(&ClassifiedError::internal("db password=hunter2"), None);
        assert_eq!(detail["error"], "InternalServerError");
        assert_eq!(detail["message"], "An unexpected error occurred");
        assert!(detail.get("context").is_none());
    }

    #[test]
    fn test_threshold_alerts_and_resets() {
        let table = ErrorFrequencyTable::new(5);

        for _ in 0..4 {
            assert!(!table.record(ErrorKind::Network));
        }
        assert_eq!(table.count(ErrorKind::Network), 4);

        assert!(table.record(ErrorKind::Network));
        assert_eq!(table.count(ErrorKind::Network), 0);

        // Other kinds are tracked independently
        assert_eq!(table.count(ErrorKind::Validation), 0);
    }

    #[test]
    fn test_classification_increments_counter() {
        let classifier = ErrorClassifier::new(5);
        classifier.classify_and_map(&ClassifiedError::validation("bad"), None);
        classifier.classify_and_map(&ClassifiedError::validation("bad"), None);
        assert_eq!(classifier.frequencies().count(ErrorKind::Validation), 2);
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let table = Arc::new(ErrorFrequencyTable::new(u32::MAX));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        table.record(ErrorKind::ApiFailure);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(table.count(ErrorKind::ApiFailure), 8000);
    }

    #[test]
    fn test_recovery_policy() {
        let classifier = ErrorClassifier::new(5);

        let cached = classifier.attempt_recovery(&ClassifiedError::network("down")).unwrap();
        assert!(cached.success);
        assert_eq!(cached.data.unwrap()["status"], "cached");

        let fallback = classifier.attempt_recovery(&ClassifiedError::api_failure("rejected")).unwrap();
        assert!(fallback.success);
        assert_eq!(fallback.data.unwrap()["status"], "fallback");

        assert!(classifier.attempt_recovery(&ClassifiedError::validation("bad")).is_none());
        assert!(classifier.attempt_recovery(&ClassifiedError::security("bad sig")).is_none());
        assert!(classifier.attempt_recovery(&ClassifiedError::internal("oops")).is_none());
    }
}
