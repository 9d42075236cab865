//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The file path
//! defaults to `config.yaml` but can be specified via `-f` or the `OKRELAY_CONFIG` environment
//! variable. A missing file is not an error; every field has a default.
//!
//! ## Loading Priority
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **Environment variables** - Variables prefixed with `OKRELAY_` override YAML values
//!
//! Nested values use double underscores, e.g. `OKRELAY_EXCHANGE__API_KEY` sets
//! `exchange.api_key`.
//!
//! ## Example
//!
//! ```yaml
//! port: 8080
//! webhook:
//!   secret: "shared-secret"
//! exchange:
//!   api_key: "..."
//!   secret_key: "..."
//!   passphrase: "..."
//!   header_prefix: "OK-"
//!   retry_base_delay: 500ms
//! filter:
//!   max_message_age: 2m
//! ```
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! OKRELAY_PORT=8080
//! OKRELAY_WEBHOOK__SECRET=shared-secret
//! OKRELAY_EXCHANGE__SECRET_KEY=...
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "OKRELAY_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Expose Prometheus metrics at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
    /// Inbound webhook authentication
    pub webhook: WebhookConfig,
    /// Exchange credentials, endpoint and retry policy
    pub exchange: ExchangeConfig,
    /// Message filtering policy
    pub filter: FilterConfig,
    /// Error frequency alerting
    pub errors: ErrorsConfig,
    /// CORS configuration for browser callers
    pub cors: CorsConfig,
}

#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    /// Shared secret for HMAC-SHA1 verification. Empty rejects every request.
    pub secret: String,
    /// Header carrying the hex signature
    pub signature_header: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            signature_header: "x-vercel-signature".to_string(),
        }
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("secret", &redacted(&self.secret))
            .field("signature_header", &self.signature_header)
            .finish()
    }
}

/// Remote exchange configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub secret_key: String,
    pub passphrase: String,
    /// Base URL of the exchange REST API
    pub base_url: Url,
    /// Versioned path prefix prepended to every endpoint
    pub api_prefix: String,
    /// Prefix for the authentication header names (`access-key`, `access-sign`, ...).
    /// OKX expects `OK-`.
    pub header_prefix: String,
    /// Overall timeout for one outbound request
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Maximum attempts per forwarded message, including the first
    pub max_attempts: u32,
    /// Backoff before retry `n` (0-based) is `retry_base_delay * 2^n`
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// Instrument used by the read-only fallback endpoint
    pub default_instrument: String,
}

impl ExchangeConfig {
    pub fn has_credentials(&self) -> bool {
        !self.api_key.is_empty() && !self.secret_key.is_empty() && !self.passphrase.is_empty()
    }
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            passphrase: String::new(),
            base_url: Url::parse("https://www.okx.com").expect("default exchange URL is valid"),
            api_prefix: "/api/v5".to_string(),
            header_prefix: String::new(),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            default_instrument: "BTC-USDT".to_string(),
        }
    }
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &redacted(&self.api_key))
            .field("secret_key", &redacted(&self.secret_key))
            .field("passphrase", &redacted(&self.passphrase))
            .field("base_url", &self.base_url.as_str())
            .field("api_prefix", &self.api_prefix)
            .field("header_prefix", &self.header_prefix)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("default_instrument", &self.default_instrument)
            .finish()
    }
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "<unset>" } else { "[REDACTED]" }
}

/// Message filtering policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FilterConfig {
    /// Messages older than this are rejected (default: 5m)
    #[serde(with = "humantime_serde")]
    pub max_message_age: Duration,
    /// Maximum length of textual content, in characters (default: 1000)
    pub max_content_length: usize,
    /// Case-insensitive substrings that reject a message outright
    pub blocked_keywords: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_message_age: Duration::from_secs(5 * 60),
            max_content_length: 1000,
            blocked_keywords: ["password", "secret", "key", "token", "credential"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ErrorsConfig {
    /// Occurrences of one error kind that trigger an alert (default: 5)
    pub alert_threshold: u32,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self { alert_threshold: 5 }
    }
}

/// CORS (Cross-Origin Resource Sharing) configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins for CORS requests
    pub allowed_origins: Vec<CorsOrigin>,
    /// Allow credentials (cookies) in CORS requests
    pub allow_credentials: bool,
    /// Cache preflight requests for this many seconds
    pub max_age: Option<u64>,
}

/// CORS origin specification.
///
/// Can be either a wildcard (`*`) to allow all origins, or a specific URL.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum CorsOrigin {
    /// Allow all origins (`*`)
    #[serde(deserialize_with = "parse_wildcard")]
    Wildcard,
    /// Specific origin URL (e.g., `https://app.example.com`)
    #[serde(deserialize_with = "parse_url")]
    Url(Url),
}

fn parse_wildcard<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    if s == "*" {
        Ok(())
    } else {
        Err(serde::de::Error::custom("Expected '*'"))
    }
}

fn parse_url<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = Deserialize::deserialize(deserializer)?;
    Url::parse(&s).map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            enable_metrics: false,
            enable_otel_export: false,
            webhook: WebhookConfig::default(),
            exchange: ExchangeConfig::default(),
            filter: FilterConfig::default(),
            errors: ErrorsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let config: Self = Self::figment(args).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<(), figment::Error> {
        if self.exchange.max_attempts == 0 {
            return Err(figment::Error::from("Config validation: exchange.max_attempts must be at least 1".to_string()));
        }

        if self.errors.alert_threshold == 0 {
            return Err(figment::Error::from("Config validation: errors.alert_threshold must be at least 1".to_string()));
        }

        if self.filter.max_content_length == 0 {
            return Err(figment::Error::from(
                "Config validation: filter.max_content_length must be at least 1".to_string(),
            ));
        }

        let has_wildcard = self.cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard));
        if has_wildcard && self.cors.allow_credentials {
            return Err(figment::Error::from(
                "Config validation: a wildcard CORS origin cannot be combined with allow_credentials".to_string(),
            ));
        }

        Ok(())
    }

    /// Log settings that let the service start but make requests fail.
    pub fn warn_on_incomplete(&self) {
        if self.webhook.secret.is_empty() {
            tracing::warn!("webhook.secret is not set: every webhook will fail signature verification");
        }
        if !self.exchange.has_credentials() {
            tracing::warn!("Exchange credentials are incomplete: forwarding will fail until they are configured");
        }
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Environment variables can still override specific values
            .merge(Env::prefixed("OKRELAY_").ignore(&["config"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
