//! Shared test helpers.

use axum_test::TestServer;
use url::Url;

use crate::{AppState, Config, build_router};

/// reqwest is built without a bundled crypto provider; install one before
/// any client is constructed. Safe to call repeatedly.
pub fn install_crypto_provider() {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Configuration with credentials set and the exchange pointed at `exchange_url`.
pub fn test_config(exchange_url: &str) -> Config {
    let mut config = Config::default();
    config.webhook.secret = WEBHOOK_SECRET.to_string();
    config.exchange.api_key = "test-key".to_string();
    config.exchange.secret_key = "test-secret".to_string();
    config.exchange.passphrase = "test-pass".to_string();
    config.exchange.base_url = Url::parse(exchange_url).expect("test exchange URL is valid");
    config.exchange.retry_base_delay = std::time::Duration::from_millis(1);
    config
}

pub fn test_server(config: Config) -> TestServer {
    install_crypto_provider();
    let router = build_router(AppState::from_config(config)).expect("Failed to build router");
    TestServer::new(router).expect("Failed to create test server")
}
