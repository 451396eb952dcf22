//! Request fingerprinting for idempotency.
//!
//! A fingerprint identifies "the same logical request" independently of the
//! client-supplied request ID. Two requests with identical fingerprints are
//! considered the same request for idempotency purposes.
//!
//! The fingerprint is HMAC-SHA256 over a canonical JSON representation of
//! the request components. The caller supplies a hash of the request body
//! (`payload_hash`) rather than the body itself, keeping this module
//! body-agnostic.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::{FeatureKey, UsageEstimate};

type HmacSha256 = Hmac<Sha256>;

/// Fixed domain-separation key for fingerprint hashing.
///
/// Not a secret: the key exists so fingerprints are stable across processes
/// and cannot collide with other HMAC uses of the same inputs.
const FINGERPRINT_KEY: &[u8] = b"request_fingerprint_v1";

/// Compute the deterministic fingerprint for a validation request.
///
/// The endpoint is lowercased and the method uppercased before hashing so
/// that cosmetic differences do not defeat idempotency. The canonical JSON
/// form uses sorted keys and no whitespace.
///
/// # Panics
///
/// Never panics in practice: HMAC-SHA256 accepts keys of any size per
/// RFC 2104, so `new_from_slice` only fails if the Hmac implementation is
/// broken.
#[must_use]
pub fn request_fingerprint(
    endpoint: &str,
    method: &str,
    payload_hash: &str,
    usage_estimate: Option<&UsageEstimate>,
    feature_key: &FeatureKey,
) -> String {
    // serde_json maps are sorted by key, which gives the canonical ordering.
    let estimate = usage_estimate.map_or(serde_json::Value::Null, |e| {
        serde_json::json!({
            "input_chars": e.input_chars,
            "max_output_tokens": e.max_output_tokens,
            "model": e.model,
        })
    });

    let data = serde_json::json!({
        "endpoint": endpoint.trim().to_lowercase(),
        "feature_key": feature_key.as_str(),
        "method": method.trim().to_uppercase(),
        "payload_hash": payload_hash,
        "usage_estimate": estimate,
    });

    let canonical = data.to_string();

    let mut mac = HmacSha256::new_from_slice(FINGERPRINT_KEY)
        .expect("HMAC-SHA256 accepts any key size");
    mac.update(canonical.as_bytes());

    hex::encode(mac.finalize().into_bytes())
}
