//! # okrelay: signed webhook relay for the OKX trading API
//!
//! `okrelay` receives webhook notifications (from charting tools, bots or any
//! HTTP sender that can sign its body), checks that they are authentic and
//! safe, and forwards them as authenticated REST calls to the exchange.
//!
//! ## Request Flow
//!
//! ```text
//! POST /webhook
//!   ├─ webhooks::verify_signature      HMAC-SHA1 over the raw body   → 401
//!   ├─ parse WebhookPayload                                          → 400
//!   ├─ filter::MessageFilter           shape, age, keywords, redact  → 400
//!   ├─ exchange::SignedApiClient       route, sign, retry, close
//!   ├─ errors::ErrorClassifier         status mapping, alerts, recovery
//!   └─ response::ResponseFormatter     envelope, response redaction  → 200 / 5xx
//! ```
//!
//! Every failure after filtering is a [`errors::ClassifiedError`]. The classifier
//! maps it to a status code and may turn transient upstream failures into a
//! degraded `200` response carrying a `cached` or `fallback` marker.
//!
//! ## Shared State
//!
//! Handlers share one [`AppState`]. The only state mutated across requests is
//! the classifier's per-kind error counters. Exchange clients are created and
//! closed per request.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use okrelay::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = okrelay::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     okrelay::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     Application::new(config)?
//!         .serve(async {
//!             tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!         })
//!         .await
//! }
//! ```

pub mod api;
pub mod config;
pub mod errors;
pub mod exchange;
pub mod filter;
pub mod models;
pub mod openapi;
pub mod response;
pub mod telemetry;
pub mod webhooks;

#[cfg(test)]
mod test_utils;

use axum::{
    Router,
    http::{self, HeaderValue},
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
use config::CorsOrigin;
use errors::ErrorClassifier;
use filter::MessageFilter;
use openapi::ApiDoc;
use response::ResponseFormatter;

/// Application state shared across all request handlers.
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .filter(Arc::new(filter))
///     .formatter(Arc::new(ResponseFormatter::new()))
///     .classifier(Arc::new(ErrorClassifier::new(5)))
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub filter: Arc<MessageFilter>,
    pub formatter: Arc<ResponseFormatter>,
    /// Holds the only cross-request mutable state
    pub classifier: Arc<ErrorClassifier>,
}

impl AppState {
    pub fn from_config(config: Config) -> Self {
        Self::builder()
            .filter(Arc::new(MessageFilter::new(&config.filter)))
            .formatter(Arc::new(ResponseFormatter::new()))
            .classifier(Arc::new(ErrorClassifier::new(config.errors.alert_threshold)))
            .config(config)
            .build()
    }
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors_config = &config.cors;

    let allow_origin = if cors_config.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let mut origins = Vec::new();
        for origin in &cors_config.allowed_origins {
            if let CorsOrigin::Url(url) = origin {
                origins.push(url.origin().ascii_serialization().parse::<HeaderValue>()?);
            }
        }
        AllowOrigin::list(origins)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_credentials(cors_config.allow_credentials);

    if let Some(max_age) = cors_config.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the router: relay routes, OpenAPI docs, CORS, optional Prometheus
/// metrics and request tracing.
#[instrument(skip_all)]
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let cors_layer = create_cors_layer(&state.config)?;
    let enable_metrics = state.config.enable_metrics;

    let mut router = Router::new()
        .route("/webhook", post(api::handlers::webhooks::receive_webhook))
        .route("/healthz", get(api::handlers::webhooks::healthz))
        .with_state(state)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(cors_layer);

    if enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

/// The HTTP server and its configuration.
///
/// 1. **Create**: [`Application::new`] builds shared state and the router
/// 2. **Serve**: [`Application::serve`] binds the port and handles requests
///    until the shutdown future resolves, then flushes telemetry
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.warn_on_incomplete();
        tracing::debug!("Starting relay with configuration: {:#?}", config);

        let router = build_router(AppState::from_config(config.clone()))?;
        Ok(Self { router, config })
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Relay listening on http://{}, webhooks accepted at http://localhost:{}/webhook",
            bind_addr, self.config.port
        );

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
