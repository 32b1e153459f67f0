//! Outbound webhook payload envelope
//!
//! Every customer-facing webhook shares one envelope shape; the body is
//! signed with the configuration's secret and the digest travels in
//! `X-RevBack-Signature`.

use chrono::{DateTime, Utc};
use rand::RngCore;
use revback_security::sign_payload;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Header carrying the HMAC of the body, `sha256=<hex>`
pub const SIGNATURE_HEADER: &str = "X-RevBack-Signature";

/// Version tag stamped into every outbound payload
pub const API_VERSION: &str = "2026-02-01";

/// The envelope delivered to customer endpoints. Customers de-duplicate on
/// `id`, which is stable across delivery retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    pub id: Uuid,
    pub event: String,
    pub api_version: String,
    pub timestamp: DateTime<Utc>,
    pub org_id: Uuid,
    pub data: Value,
}

impl OutboundEnvelope {
    pub fn new(event: impl Into<String>, org_id: Uuid, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event: event.into(),
            api_version: API_VERSION.to_string(),
            timestamp: Utc::now(),
            org_id,
            data,
        }
    }

    /// Serialize and sign; returns (body, signature header value)
    pub fn sign(&self, secret: &str) -> serde_json::Result<(String, String)> {
        let body = serde_json::to_string(self)?;
        let signature = sign_payload(secret.as_bytes(), body.as_bytes());
        Ok((body, signature))
    }
}

/// Server-generated signing secret for customer webhook configs, shown to
/// the customer exactly once.
pub fn generate_signing_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("whsec_{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use revback_security::verify_hmac_hex;
    use serde_json::json;

    #[test]
    fn envelope_serializes_with_camel_case_keys() {
        let envelope = OutboundEnvelope::new("issue.created", Uuid::new_v4(), json!({"x": 1}));
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["apiVersion"], API_VERSION);
        assert_eq!(value["event"], "issue.created");
        assert!(value["orgId"].is_string());
        assert!(value.get("api_version").is_none());
    }

    #[test]
    fn signature_verifies_against_the_exact_body() {
        let envelope = OutboundEnvelope::new("issue.resolved", Uuid::new_v4(), json!({}));
        let (body, header) = envelope.sign("whsec_abc").unwrap();
        let hex_digest = header.strip_prefix("sha256=").unwrap();
        assert!(verify_hmac_hex(b"whsec_abc", body.as_bytes(), hex_digest));
    }

    #[test]
    fn envelope_id_is_stable_across_retries() {
        let envelope = OutboundEnvelope::new("issue.created", Uuid::new_v4(), json!({}));
        let (body_a, _) = envelope.sign("s").unwrap();
        let (body_b, _) = envelope.sign("s").unwrap();
        // same envelope re-signed produces the identical body, so the
        // customer's dedupe key does not change between attempts
        assert_eq!(body_a, body_b);
    }

    #[test]
    fn signing_secrets_have_the_expected_shape() {
        let secret = generate_signing_secret();
        assert!(secret.starts_with("whsec_"));
        assert_eq!(secret.len(), 6 + 48);
        assert_ne!(secret, generate_signing_secret());
    }
}
