//! Inbound webhook authentication.
//!
//! - [`signing`]: HMAC-SHA1 signature computation and constant-time verification

pub mod signing;

pub use signing::{sign_body, verify_signature};
