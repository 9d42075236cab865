//! HTTP transport abstraction for exchange calls.
//!
//! The [`ExchangeTransport`] trait sends one already-signed request and returns
//! the raw status and body. Interpreting the response and retrying are left to
//! [`super::SignedApiClient`].

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::errors::ClassifiedError;

/// A fully built POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Absolute request path, e.g. `/api/v5/trade/order`
    pub path: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

/// A request that produced no HTTP response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request failed: {0}")]
    Request(String),
}

#[async_trait]
pub trait ExchangeTransport: Send + Sync {
    async fn send(&self, request: &SignedRequest) -> Result<TransportResponse, TransportError>;
}

/// Production transport backed by a reqwest connection pool.
///
/// The pool is released when the transport is dropped.
#[derive(Debug)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, ClassifiedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifiedError::internal(format!("Failed to create exchange HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ExchangeTransport for ReqwestTransport {
    #[tracing::instrument(skip(self, request), fields(path = %request.path))]
    async fn send(&self, request: &SignedRequest) -> Result<TransportResponse, TransportError> {
        let url = format!("{}{}", self.base_url, request.path);

        let mut builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        let response = builder.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_reqwest_error)?;

        tracing::debug!(status, response_len = body.len(), "Exchange request completed");
        Ok(TransportResponse { status, body })
    }
}

fn classify_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Request(error.to_string())
    }
}

/// In-memory transport that replays scripted results and records requests.
#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    pub(crate) struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Result<TransportResponse, TransportError>>>>,
        calls: Arc<Mutex<Vec<SignedRequest>>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                script: Arc::new(Mutex::new(script.into())),
                calls: Arc::default(),
            }
        }

        pub(crate) fn calls(&self) -> Vec<SignedRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeTransport for ScriptedTransport {
        async fn send(&self, request: &SignedRequest) -> Result<TransportResponse, TransportError> {
            self.calls.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connect("script exhausted".to_string())))
        }
    }

    pub(crate) fn ok(body: &str) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status: 200,
            body: body.to_string(),
        })
    }

    pub(crate) fn status(status: u16) -> Result<TransportResponse, TransportError> {
        Ok(TransportResponse {
            status,
            body: String::new(),
        })
    }

    pub(crate) fn connect_error() -> Result<TransportResponse, TransportError> {
        Err(TransportError::Connect("connection refused".to_string()))
    }
}
