//! HTTP handlers for inbound webhooks.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde_json::{Value, json};
use std::time::Instant;
use tracing::instrument;

use crate::{
    AppState,
    errors::{ClassifiedError, ErrorResponse},
    exchange::{SignedApiClient, routing},
    models::{InboundMessage, WebhookPayload},
    response::Envelope,
    webhooks::verify_signature,
};

/// Verify, filter and forward one webhook notification.
#[utoipa::path(
    post,
    path = "/webhook",
    tag = "webhooks",
    summary = "Relay a webhook",
    description = "Verifies the HMAC-SHA1 signature of the raw body, filters the message and forwards it to the exchange.

Transient upstream failures are answered with `200` and a `cached` or `fallback` marker in `okx_response`.",
    request_body = WebhookPayload,
    params(
        ("x-vercel-signature" = String, Header, description = "Hex HMAC-SHA1 of the raw body keyed by the shared secret"),
    ),
    responses(
        (status = 200, description = "Forwarded, or recovered from an upstream failure", body = Envelope),
        (status = 400, description = "Invalid JSON or message rejected by the filter"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 502, description = "Unrecoverable exchange failure", body = Envelope),
        (status = 500, description = "Internal error", body = Envelope),
    )
)]
#[instrument(skip_all)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Envelope>), ErrorResponse> {
    let arrived_at = Utc::now();

    let signature = headers
        .get(state.config.webhook.signature_header.as_str())
        .and_then(|value| value.to_str().ok());
    if !verify_signature(&body, signature, &state.config.webhook.secret) {
        let error = ClassifiedError::security("Invalid signature");
        let (status, detail) = state.classifier.classify_and_map(&error, None);
        return Err(ErrorResponse::new(status, detail));
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(error = %e, "Webhook body is not a valid payload");
        ErrorResponse::new(StatusCode::BAD_REQUEST, "Invalid JSON payload")
    })?;
    let message = payload.into_message(arrived_at);

    let filtered = state.filter.filter(&message).map_err(|rejection| {
        tracing::warn!(sender = %message.sender, reason = %rejection, "Message filtered out");
        let error = ClassifiedError::from(rejection);
        state.classifier.classify_and_map(&error, None);
        ErrorResponse::new(StatusCode::BAD_REQUEST, error.message)
    })?;

    let client = match SignedApiClient::from_config(&state.config.exchange) {
        Ok(client) => client,
        Err(error) => return Ok(failure_response(&state, &filtered, error)),
    };

    let endpoint = routing::route(&filtered.content, &state.config.exchange.default_instrument).endpoint;
    state.formatter.log_request_details(&filtered, endpoint.path());

    let started = Instant::now();
    let result = client.forward(&filtered).await;
    client.close();
    state.formatter.log_response_metrics(started.elapsed());

    match result {
        Ok(response) => Ok((
            StatusCode::OK,
            Json(state.formatter.format(Some(&filtered), Some(&response), true, None)),
        )),
        Err(error) => Ok(failure_response(&state, &filtered, error)),
    }
}

/// Classify a processing failure, then either recover it into a degraded
/// success or answer with the mapped status.
fn failure_response(state: &AppState, message: &InboundMessage, error: ClassifiedError) -> (StatusCode, Json<Envelope>) {
    let (status, detail) = state.classifier.classify_and_map(&error, Some(error.context.clone()));
    tracing::debug!(%detail, "Classified processing failure");

    if let Some(recovered) = state.classifier.attempt_recovery(&error) {
        return (
            StatusCode::OK,
            Json(state.formatter.format(Some(message), Some(&recovered), true, None)),
        );
    }

    let user_message = error.user_message();
    (status, Json(state.formatter.format(Some(message), None, false, Some(&user_message))))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/healthz",
    tag = "health",
    summary = "Health check",
    responses((status = 200, description = "Service is up")),
)]
pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::failure_response;
    use crate::AppState;
    use crate::errors::{ClassifiedError, ErrorKind};
    use crate::models::InboundMessage;
    use crate::response::EnvelopeStatus;
    use crate::test_utils::{WEBHOOK_SECRET, test_config, test_server};
    use crate::webhooks::sign_body;
    use axum::{http::StatusCode, response::Json};
    use bytes::Bytes;
    use chrono::{TimeDelta, Utc};
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SIGNATURE_HEADER: &str = "x-vercel-signature";

    fn signed(payload: &Value) -> (Bytes, String) {
        let body = serde_json::to_vec(payload).unwrap();
        let signature = sign_body(&body, WEBHOOK_SECRET).expect("should sign");
        (Bytes::from(body), signature)
    }

    async fn exchange_returning(status: u16, body: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[test_log::test(tokio::test)]
    async fn test_valid_webhook_is_forwarded() {
        let exchange = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v5/trade/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": "0",
                "data": [{"ordId": "123", "apiKey": "abc"}]
            })))
            .expect(1)
            .mount(&exchange)
            .await;
        let server = test_server(test_config(&exchange.uri()));

        let (body, signature) = signed(&json!({
            "sender": "tradingview",
            "content": {"instId": "BTC-USDT", "side": "buy", "sz": "1"}
        }));
        let response = server
            .post("/webhook")
            .add_header(SIGNATURE_HEADER, signature.as_str())
            .content_type("application/json")
            .bytes(body)
            .await;

        response.assert_status_ok();
        let envelope: Value = response.json();
        assert_eq!(envelope["status"], "success");
        assert_eq!(envelope["sender"], "tradingview");
        assert_eq!(envelope["processing_result"]["success"], true);
        assert_eq!(envelope["okx_response"]["data"][0]["ordId"], "123");
        assert_eq!(envelope["okx_response"]["data"][0]["apiKey"], "[REDACTED]");
    }

    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let exchange = MockServer::start().await;
        let server = test_server(test_config(&exchange.uri()));

        let response = server
            .post("/webhook")
            .json(&json!({"sender": "x", "content": "hello"}))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["status"], "error");
        assert_eq!(body["detail"]["error"], "SecurityError");
        assert!(exchange.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signature_over_different_bytes_is_unauthorized() {
        let exchange = MockServer::start().await;
        let server = test_server(test_config(&exchange.uri()));

        let (_, signature) = signed(&json!({"sender": "x", "content": "hello"}));
        let response = server
            .post("/webhook")
            .add_header(SIGNATURE_HEADER, signature.as_str())
            .bytes(Bytes::from_static(br#"{ "sender": "x", "content": "hello" }"#))
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unconfigured_secret_rejects_everything() {
        let exchange = MockServer::start().await;
        let mut config = test_config(&exchange.uri());
        config.webhook.secret = String::new();
        let server = test_server(config);

        let body = Bytes::from_static(br#"{"sender":"x","content":"hello"}"#);
        let signature = sign_body(&body, "").expect("should sign");
        let response = server
            .post("/webhook")
            .add_header(SIGNATURE_HEADER, signature.as_str())
            .bytes(body)
            .await;

        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_invalid_json_is_bad_request() {
        let exchange = MockServer::start().await;
        let server = test_server(test_config(&exchange.uri()));

        let body = Bytes::from_static(b"not json");
        let signature = sign_body(&body, WEBHOOK_SECRET).expect("should sign");
        let response = server
            .post("/webhook")
            .add_header(SIGNATURE_HEADER, signature.as_str())
            .bytes(body)
            .await;

        response.assert_status_bad_request();
        assert_eq!(response.json::<Value>(), json!({"status": "error", "detail": "Invalid JSON payload"}));
    }

    #[tokio::test]
    async fn test_filtered_messages_are_bad_requests() {
        let exchange = MockServer::start().await;
        let server = test_server(test_config(&exchange.uri()));

        let cases = [
            (json!({"sender": "x", "content": "my password is hunter2"}), "Message contains sensitive information"),
            (json!({"content": "hello"}), "Missing required field: sender"),
            (json!({"sender": "x"}), "Missing required field: content"),
            (
                json!({"sender": "x", "content": "hello", "timestamp": (Utc::now() - TimeDelta::minutes(10)).to_rfc3339()}),
                "Message is too old",
            ),
        ];

        for (payload, reason) in cases {
            let (body, signature) = signed(&payload);
            let response = server
                .post("/webhook")
                .add_header(SIGNATURE_HEADER, signature.as_str())
                .bytes(body)
                .await;

            response.assert_status_bad_request();
            assert_eq!(response.json::<Value>()["detail"], reason, "payload {payload}");
        }

        // Nothing was forwarded
        assert!(exchange.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_recovers_with_fallback() {
        let exchange = exchange_returning(500, json!({"code": "50000", "msg": "boom"})).await;
        let server = test_server(test_config(&exchange.uri()));

        let (body, signature) = signed(&json!({"sender": "bot", "content": {"instId": "ETH-USDT", "type": "market_data"}}));
        let response = server
            .post("/webhook")
            .add_header(SIGNATURE_HEADER, signature.as_str())
            .bytes(body)
            .await;

        response.assert_status_ok();
        let envelope: Value = response.json();
        assert_eq!(envelope["status"], "success");
        assert_eq!(envelope["okx_response"], json!({"status": "fallback", "message": "Using fallback response"}));
        // 500 is not retried
        assert_eq!(exchange.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_recover_with_fallback() {
        let exchange = exchange_returning(429, json!({})).await;
        let server = test_server(test_config(&exchange.uri()));

        let (body, signature) = signed(&json!({"sender": "bot", "content": "ping"}));
        let response = server
            .post("/webhook")
            .add_header(SIGNATURE_HEADER, signature.as_str())
            .bytes(body)
            .await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>()["okx_response"]["status"], "fallback");
        assert_eq!(exchange.received_requests().await.unwrap().len(), 3);
    }

    #[test]
    fn test_network_failure_recovers_with_cached_marker() {
        let state = AppState::from_config(test_config("http://localhost:1"));
        let message = InboundMessage::new("bot", json!({"instId": "BTC-USDT"}));

        let (status, Json(envelope)) = failure_response(&state, &message, ClassifiedError::network("Connection failed"));

        assert_eq!(status, StatusCode::OK);
        assert_eq!(envelope.status, EnvelopeStatus::Success);
        assert!(envelope.processing_result.success);
        assert_eq!(envelope.processing_result.error_message, None);
        assert_eq!(envelope.okx_response, Some(json!({"status": "cached", "message": "Using cached response"})));
        assert_eq!(state.classifier.frequencies().count(ErrorKind::Network), 1);
    }

    #[test]
    fn test_unrecoverable_failure_keeps_mapped_status() {
        let state = AppState::from_config(test_config("http://localhost:1"));
        let message = InboundMessage::new("bot", json!("ping"));

        let (status, Json(envelope)) = failure_response(&state, &message, ClassifiedError::security("Invalid signature"));

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(envelope.status, EnvelopeStatus::Error);
        assert_eq!(envelope.processing_result.error_message.as_deref(), Some("Invalid signature"));
        assert!(envelope.okx_response.is_none());
    }

    #[tokio::test]
    async fn test_missing_credentials_is_internal_error() {
        let exchange = MockServer::start().await;
        let mut config = test_config(&exchange.uri());
        config.exchange.api_key = String::new();
        let server = test_server(config);

        let (body, signature) = signed(&json!({"sender": "bot", "content": "ping"}));
        let response = server
            .post("/webhook")
            .add_header(SIGNATURE_HEADER, signature.as_str())
            .bytes(body)
            .await;

        response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope: Value = response.json();
        assert_eq!(envelope["status"], "error");
        assert_eq!(envelope["processing_result"]["error_message"], "An unexpected error occurred");
        assert!(envelope["okx_response"].is_null());
    }

    #[tokio::test]
    async fn test_healthz() {
        let server = test_server(test_config("http://localhost:1"));

        let response = server.get("/healthz").await;

        response.assert_status_ok();
        assert_eq!(response.json::<Value>(), json!({"status": "ok"}));
    }
}
