//! Outbound request authentication.
//!
//! Each request carries four headers: the API key, a base64 HMAC-SHA256
//! signature, the signing timestamp and the passphrase. The signature covers
//! `timestamp + method + request_path + body`, where the body is the exact
//! byte string that is sent.

use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::ExchangeConfig;
use crate::errors::ClassifiedError;

type HmacSha256 = Hmac<Sha256>;

pub const KEY_HEADER: &str = "access-key";
pub const SIGN_HEADER: &str = "access-sign";
pub const TIMESTAMP_HEADER: &str = "access-timestamp";
pub const PASSPHRASE_HEADER: &str = "access-passphrase";

#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    secret_key: String,
    passphrase: String,
}

impl Credentials {
    /// Fails if any of the three values is empty.
    pub fn from_config(config: &ExchangeConfig) -> Result<Self, ClassifiedError> {
        if !config.has_credentials() {
            return Err(ClassifiedError::internal("OKX API credentials not properly configured"));
        }
        Ok(Self {
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            passphrase: config.passphrase.clone(),
        })
    }

    /// Build the authentication headers for one request.
    ///
    /// `header_prefix` is prepended to every header name.
    pub fn headers(
        &self,
        header_prefix: &str,
        timestamp: &str,
        method: &str,
        path: &str,
        body: &str,
    ) -> Result<Vec<(String, String)>, ClassifiedError> {
        let signature = sign_request(&self.secret_key, timestamp, method, path, body)
            .ok_or_else(|| ClassifiedError::internal("Failed to sign exchange request"))?;
        Ok(vec![
            (format!("{header_prefix}{KEY_HEADER}"), self.api_key.clone()),
            (format!("{header_prefix}{SIGN_HEADER}"), signature),
            (format!("{header_prefix}{TIMESTAMP_HEADER}"), timestamp.to_string()),
            (format!("{header_prefix}{PASSPHRASE_HEADER}"), self.passphrase.clone()),
        ])
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials").field("api_key", &"[REDACTED]").finish_non_exhaustive()
    }
}

/// ISO-8601 UTC with second precision, e.g. `2024-01-01T12:00:00Z`.
pub fn auth_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// ISO-8601 UTC with millisecond precision, used inside request bodies.
pub fn body_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Base64 HMAC-SHA256 over `timestamp + method + path + body`.
pub fn sign_request(secret_key: &str, timestamp: &str, method: &str, path: &str, body: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(body.as_bytes());
    Some(STANDARD.encode(mac.finalize().into_bytes()))
}
