//! Signed client for the exchange REST API.
//!
//! ```text
//! forward(message)
//!   ├─ routing::route(content)        // order / ticker / tickers
//!   ├─ body = fields + timestamp + source
//!   └─ loop (RetryState):
//!        ├─ sign(timestamp + POST + path + body)
//!        ├─ transport.send()
//!        └─ interpret:
//!             ├─ 2xx, code "0"      → Ok
//!             ├─ 429 / no response  → back off, retry
//!             └─ anything else      → APIFailure, no retry
//! ```
//!
//! A client is created per inbound request and released with
//! [`SignedApiClient::close`] once the call has finished.

pub mod retry;
pub mod routing;
pub mod signing;
pub mod transport;

use metrics::{counter, histogram};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::ExchangeConfig;
use crate::errors::{ClassifiedError, ErrorKind};
use crate::models::{ExchangeResponse, InboundMessage};

use retry::{NextStep, RetryPolicy, RetryState, Sleeper, TokioSleeper};
use routing::Endpoint;
use signing::Credentials;
use transport::{ExchangeTransport, ReqwestTransport, SignedRequest, TransportError, TransportResponse};

const METHOD: &str = "POST";

/// Why a single attempt failed.
enum AttemptFailure {
    RateLimited,
    Transport(TransportError),
    /// Not retried
    Rejected(ClassifiedError),
}

pub struct SignedApiClient {
    credentials: Credentials,
    api_prefix: String,
    header_prefix: String,
    default_instrument: String,
    policy: RetryPolicy,
    transport: Box<dyn ExchangeTransport>,
    sleeper: Arc<dyn Sleeper>,
}

impl SignedApiClient {
    /// Build a client with its own connection pool.
    ///
    /// Fails with an Internal error if any credential is missing.
    pub fn from_config(config: &ExchangeConfig) -> Result<Self, ClassifiedError> {
        let credentials = Credentials::from_config(config)?;
        let transport = ReqwestTransport::new(&config.base_url, config.timeout)?;
        Ok(Self::assemble(config, credentials, Box::new(transport), Arc::new(TokioSleeper)))
    }

    /// Build a client over a caller-supplied transport and sleeper.
    pub fn with_transport(
        config: &ExchangeConfig,
        transport: Box<dyn ExchangeTransport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Result<Self, ClassifiedError> {
        let credentials = Credentials::from_config(config)?;
        Ok(Self::assemble(config, credentials, transport, sleeper))
    }

    fn assemble(
        config: &ExchangeConfig,
        credentials: Credentials,
        transport: Box<dyn ExchangeTransport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            credentials,
            api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
            header_prefix: config.header_prefix.clone(),
            default_instrument: config.default_instrument.clone(),
            policy: RetryPolicy::new(config.max_attempts, config.retry_base_delay),
            transport,
            sleeper,
        }
    }

    /// Send a filtered message to the exchange endpoint its content selects.
    pub async fn forward(&self, message: &InboundMessage) -> Result<ExchangeResponse, ClassifiedError> {
        let route = routing::route(&message.content, &self.default_instrument);
        let endpoint = route.endpoint;
        let path = format!("{}/{}", self.api_prefix, endpoint.path());
        let body = request_body(route.fields, message)?;

        tracing::info!(sender = %message.sender, endpoint = %endpoint, "Forwarding message");

        let mut state = RetryState::new(self.policy);
        loop {
            let timestamp = signing::auth_timestamp(Utc::now());
            let request = SignedRequest {
                headers: self.credentials.headers(&self.header_prefix, &timestamp, METHOD, &path, &body)?,
                path: path.clone(),
                body: body.clone(),
            };

            let started = Instant::now();
            let outcome = match self.transport.send(&request).await {
                Ok(response) => interpret(response, endpoint),
                Err(e) => Err(AttemptFailure::Transport(e)),
            };
            histogram!("okrelay_exchange_request_duration_seconds").record(started.elapsed().as_secs_f64());

            let attempt_number = state.attempt() + 1;
            let reason = match outcome {
                Ok(response) => {
                    counter!("okrelay_exchange_attempts_total", "endpoint" => endpoint.path(), "outcome" => "success").increment(1);
                    return Ok(response);
                }
                Err(AttemptFailure::Rejected(error)) => {
                    counter!("okrelay_exchange_attempts_total", "endpoint" => endpoint.path(), "outcome" => "rejected").increment(1);
                    return Err(error);
                }
                Err(AttemptFailure::RateLimited) => {
                    counter!("okrelay_exchange_attempts_total", "endpoint" => endpoint.path(), "outcome" => "rate_limited").increment(1);
                    tracing::warn!(endpoint = %endpoint, "Rate limit hit (attempt {}/{})", attempt_number, state.max_attempts());
                    "Rate limit exceeded".to_string()
                }
                Err(AttemptFailure::Transport(e)) => {
                    counter!("okrelay_exchange_attempts_total", "endpoint" => endpoint.path(), "outcome" => "network_error").increment(1);
                    tracing::warn!(
                        endpoint = %endpoint,
                        error = %e,
                        "Connection failed, will retry (attempt {}/{})",
                        attempt_number,
                        state.max_attempts()
                    );
                    e.to_string()
                }
            };

            match state.record_failure(reason) {
                NextStep::Retry { delay, .. } => self.sleeper.sleep(delay).await,
                NextStep::Exhausted(error) => {
                    tracing::error!(
                        endpoint = %endpoint,
                        attempts = state.max_attempts(),
                        last_error = ?state.last_error(),
                        "Exchange call failed after all attempts"
                    );
                    return Err(error);
                }
            }
        }
    }

    /// Release the connection pool.
    pub fn close(self) {
        tracing::debug!("Closing exchange client");
        drop(self.transport);
    }
}

/// Endpoint fields plus the message timestamp and sender, serialized once.
/// The returned string is both signed and sent.
fn request_body(mut fields: Map<String, Value>, message: &InboundMessage) -> Result<String, ClassifiedError> {
    fields.insert("timestamp".to_string(), json!(signing::body_timestamp(message.timestamp)));
    fields.insert("source".to_string(), json!(message.sender));
    serde_json::to_string(&Value::Object(fields))
        .map_err(|e| ClassifiedError::internal(format!("Failed to serialize request body: {e}")))
}

fn interpret(response: TransportResponse, endpoint: Endpoint) -> Result<ExchangeResponse, AttemptFailure> {
    if response.status == 429 {
        return Err(AttemptFailure::RateLimited);
    }

    let mut context = Map::new();
    context.insert("endpoint".to_string(), json!(endpoint.path()));
    context.insert("status_code".to_string(), json!(response.status));

    if !(200..300).contains(&response.status) {
        return Err(AttemptFailure::Rejected(ClassifiedError::with_context(
            ErrorKind::ApiFailure,
            format!("HTTP error: {}", response.status),
            context,
        )));
    }

    let Ok(body) = serde_json::from_str::<Value>(&response.body) else {
        return Err(AttemptFailure::Rejected(ClassifiedError::with_context(
            ErrorKind::ApiFailure,
            "Invalid response body",
            context,
        )));
    };

    if !is_success_code(body.get("code")) {
        let msg = body.get("msg").and_then(Value::as_str).filter(|m| !m.is_empty()).unwrap_or("Unknown error");
        context.insert("code".to_string(), body.get("code").cloned().unwrap_or(Value::Null));
        return Err(AttemptFailure::Rejected(ClassifiedError::with_context(
            ErrorKind::ApiFailure,
            format!("OKX API Error: {msg}"),
            context,
        )));
    }

    Ok(ExchangeResponse::ok(body))
}

fn is_success_code(code: Option<&Value>) -> bool {
    match code {
        Some(Value::String(code)) => code == "0",
        Some(Value::Number(code)) => code.as_i64() == Some(0),
        _ => false,
    }
}
