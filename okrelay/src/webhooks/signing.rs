//! HMAC-SHA1 verification of inbound webhook bodies.
//!
//! The caller signs the exact raw request bytes with the shared secret and
//! sends the lowercase hex digest in a header (`x-vercel-signature` by
//! default). Verification recomputes the digest over the same bytes, never
//! over a re-serialized form of the JSON.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Compute the hex-encoded HMAC-SHA1 of `body` keyed by `secret`.
///
/// Returns `None` if the MAC cannot be keyed.
pub fn sign_body(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha1::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a webhook signature.
///
/// # Arguments
///
/// * `raw_body` - The request body exactly as received
/// * `provided_signature` - The signature header value, if present
/// * `secret` - The shared webhook secret
///
/// # Returns
///
/// `true` only if a secret is configured, a signature was provided, and it
/// matches the expected digest. Fails closed in every other case.
pub fn verify_signature(raw_body: &[u8], provided_signature: Option<&str>, secret: &str) -> bool {
    if secret.is_empty() {
        tracing::warn!("Webhook secret not configured");
        return false;
    }

    let Some(provided) = provided_signature else {
        tracing::warn!("Missing webhook signature header");
        return false;
    };

    let Some(expected) = sign_body(raw_body, secret) else {
        tracing::error!("Failed to compute webhook signature");
        return false;
    };
    constant_time_eq(provided.as_bytes(), expected.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
