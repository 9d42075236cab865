//! HTTP request handlers.
//!
//! - [`webhooks`]: inbound webhook relay and health check

pub mod webhooks;
