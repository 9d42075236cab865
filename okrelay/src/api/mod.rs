//! HTTP surface of the relay.
//!
//! | Route                    | Handler                                  |
//! |--------------------------|------------------------------------------|
//! | `POST /webhook`          | [`handlers::webhooks::receive_webhook`]  |
//! | `GET /healthz`           | [`handlers::webhooks::healthz`]          |
//! | `GET /docs`              | OpenAPI reference ([`crate::openapi`])   |
//! | `GET /internal/metrics`  | Prometheus, when `enable_metrics` is set |

pub mod handlers;
