//! HMAC signature utilities
//!
//! Used on both sides of the platform boundary: verifying inbound provider
//! webhooks (Stripe, Recurly) and signing outbound deliveries to customer
//! endpoints. All comparisons are constant-time.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute HMAC-SHA256 over `payload` and return the lowercase hex digest
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time equality over byte slices of possibly different lengths
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Verify a hex-encoded HMAC-SHA256 signature in constant time
pub fn verify_hmac_hex(secret: &[u8], payload: &[u8], expected_hex: &str) -> bool {
    let computed = hmac_sha256_hex(secret, payload);
    constant_time_eq(computed.as_bytes(), expected_hex.trim().as_bytes())
}

/// Sign an outbound webhook body, returning the `X-RevBack-Signature` value
pub fn sign_payload(secret: &[u8], body: &[u8]) -> String {
    format!("sha256={}", hmac_sha256_hex(secret, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_digest_matches_known_vector() {
        // RFC 4231 test case 2
        let digest = hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn verify_accepts_correct_and_rejects_tampered() {
        let secret = b"whsec_test";
        let body = b"{\"id\":\"evt_1\"}";
        let signature = hmac_sha256_hex(secret, body);

        assert!(verify_hmac_hex(secret, body, &signature));
        assert!(!verify_hmac_hex(secret, b"{\"id\":\"evt_2\"}", &signature));
        assert!(!verify_hmac_hex(b"other", body, &signature));
    }

    #[test]
    fn constant_time_eq_handles_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"abc", b"abc"));
    }

    #[test]
    fn outbound_signature_carries_scheme_prefix() {
        let value = sign_payload(b"secret", b"body");
        assert!(value.starts_with("sha256="));
        assert_eq!(value.len(), "sha256=".len() + 64);
    }
}
