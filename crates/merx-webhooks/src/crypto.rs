//! HMAC-SHA256 payload signing for outbound webhook requests.
//!
//! The signature covers the raw payload bytes with the subscriber's secret
//! key and travels in the `X-Merx-Signature` header, hex-encoded.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex-encoded HMAC-SHA256 signature for a payload.
#[must_use]
pub fn signature_for_payload(body: &[u8], secret: &str) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex-encoded signature using constant-time comparison.
#[must_use]
pub fn verify_signature(expected_hex: &str, body: &[u8], secret: &str) -> bool {
    let computed = signature_for_payload(body, secret);
    constant_time_eq(expected_hex.as_bytes(), computed.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;
    a.ct_eq(b).into()
}
