//! Apple App Store Server Notifications (v2) normalizer
//!
//! The inbound body is `{"signedPayload": <JWS>}` whose payload embeds a
//! second JWS with the transaction info. Verification checks both layers
//! against the x5c certificate chain carried in each JWS header; when root
//! fingerprints are pinned, the chain must terminate in one of them.

use super::{idempotency_key, ConnectionContext, InboundWebhook, Normalizer};
use crate::error::{IngestionError, IngestionResult};
use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use revback_shared::{
    BillingSource, EventStatus, EventType, IdType, IdentityHint, NormalizedEvent,
    ProviderEnvironment,
};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

pub struct AppleNormalizer {
    /// SHA-256 fingerprints (hex) of acceptable chain roots. Empty means
    /// trust-store reliance — the leaf key still has to verify the JWS.
    pinned_root_fingerprints: Vec<String>,
}

impl AppleNormalizer {
    pub fn new() -> Self {
        Self {
            pinned_root_fingerprints: Vec::new(),
        }
    }

    pub fn with_pinned_roots(fingerprints: Vec<String>) -> Self {
        Self {
            pinned_root_fingerprints: fingerprints,
        }
    }

    /// Verify a JWS against its x5c leaf certificate and return the payload
    fn verify_jws(&self, token: &str) -> IngestionResult<Value> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| IngestionError::signature("apple", format!("bad JWS header: {e}")))?;
        let chain = header
            .x5c
            .ok_or_else(|| IngestionError::signature("apple", "missing x5c chain"))?;
        if chain.is_empty() {
            return Err(IngestionError::signature("apple", "empty x5c chain"));
        }

        if !self.pinned_root_fingerprints.is_empty() {
            let root_der = BASE64
                .decode(chain.last().expect("non-empty chain"))
                .map_err(|e| IngestionError::signature("apple", format!("bad root cert: {e}")))?;
            let fingerprint = hex::encode(Sha256::digest(&root_der));
            if !self
                .pinned_root_fingerprints
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&fingerprint))
            {
                return Err(IngestionError::signature(
                    "apple",
                    "chain root does not match pinned fingerprints",
                ));
            }
        }

        let leaf_der = BASE64
            .decode(&chain[0])
            .map_err(|e| IngestionError::signature("apple", format!("bad leaf cert: {e}")))?;
        let (_, cert) = x509_parser::parse_x509_certificate(&leaf_der)
            .map_err(|e| IngestionError::signature("apple", format!("unparseable leaf: {e}")))?;
        let public_key_point = &cert.tbs_certificate.subject_pki.subject_public_key.data;
        let key = DecodingKey::from_ec_der(public_key_point);

        let mut validation = Validation::new(Algorithm::ES256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let decoded = jsonwebtoken::decode::<Value>(token, &key, &validation)
            .map_err(|e| IngestionError::signature("apple", format!("JWS invalid: {e}")))?;
        Ok(decoded.claims)
    }
}

impl Default for AppleNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a JWS payload segment without verifying. Used by normalize after
/// `verify_signature` has already run (or on the trusted backfill path).
fn decode_payload(token: &str) -> IngestionResult<Value> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| IngestionError::invalid_payload("apple", "not a JWS"))?;
    let bytes = BASE64_URL
        .decode(payload)
        .map_err(|e| IngestionError::invalid_payload("apple", format!("payload: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| IngestionError::invalid_payload("apple", e.to_string()))
}

fn signed_payload(webhook: &InboundWebhook) -> IngestionResult<String> {
    let body: Value = serde_json::from_str(&webhook.body)
        .map_err(|e| IngestionError::invalid_payload("apple", e.to_string()))?;
    body["signedPayload"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| IngestionError::invalid_payload("apple", "missing signedPayload"))
}

/// Map (notificationType, subtype) to a canonical event
fn map_notification(notification_type: &str, subtype: Option<&str>) -> Option<(EventType, EventStatus)> {
    match (notification_type, subtype) {
        ("SUBSCRIBED", _) => Some((EventType::Purchase, EventStatus::Success)),
        ("DID_RENEW", _) => Some((EventType::Renewal, EventStatus::Success)),
        ("DID_FAIL_TO_RENEW", Some("GRACE_PERIOD")) => {
            Some((EventType::GracePeriodStart, EventStatus::Success))
        }
        ("DID_FAIL_TO_RENEW", _) => Some((EventType::BillingRetry, EventStatus::Failed)),
        ("EXPIRED", _) => Some((EventType::Expiration, EventStatus::Success)),
        ("REFUND", _) => Some((EventType::Refund, EventStatus::Refunded)),
        ("GRACE_PERIOD_EXPIRES", _) => Some((EventType::GracePeriodStart, EventStatus::Success)),
        ("OFFER_REDEEMED", _) => Some((EventType::OfferRedeemed, EventStatus::Success)),
        ("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_DISABLED")) => {
            Some((EventType::Cancellation, EventStatus::Success))
        }
        ("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_ENABLED")) => {
            Some((EventType::Resume, EventStatus::Success))
        }
        ("DID_CHANGE_RENEWAL_PREF", Some("UPGRADE")) => {
            Some((EventType::Upgrade, EventStatus::Success))
        }
        ("DID_CHANGE_RENEWAL_PREF", Some("DOWNGRADE")) => {
            Some((EventType::Downgrade, EventStatus::Success))
        }
        ("REVOKE", _) => Some((EventType::Revoke, EventStatus::Success)),
        ("PRICE_INCREASE", _) => Some((EventType::PriceChange, EventStatus::Success)),
        _ => None,
    }
}

/// Last dot-segment of an App Store product id, e.g.
/// `com.example.app.monthly` → `monthly`
fn plan_tier_from_product_id(product_id: &str) -> String {
    product_id
        .rsplit('.')
        .next()
        .unwrap_or(product_id)
        .to_string()
}

#[async_trait]
impl Normalizer for AppleNormalizer {
    fn source(&self) -> BillingSource {
        BillingSource::Apple
    }

    async fn verify_signature(
        &self,
        webhook: &InboundWebhook,
        _ctx: &ConnectionContext,
    ) -> IngestionResult<()> {
        let outer = signed_payload(webhook)?;
        let payload = self.verify_jws(&outer)?;
        // the embedded transaction info is itself a JWS
        if let Some(inner) = payload["data"]["signedTransactionInfo"].as_str() {
            self.verify_jws(inner)?;
        }
        Ok(())
    }

    async fn normalize(
        &self,
        _org_id: Uuid,
        webhook: &InboundWebhook,
        _ctx: &ConnectionContext,
    ) -> IngestionResult<Vec<NormalizedEvent>> {
        let outer = signed_payload(webhook)?;
        let payload = decode_payload(&outer)?;

        let notification_type = payload["notificationType"]
            .as_str()
            .ok_or_else(|| IngestionError::invalid_payload("apple", "missing notificationType"))?
            .to_string();
        let subtype = payload["subtype"].as_str().map(str::to_string);
        let notification_uuid = payload["notificationUUID"]
            .as_str()
            .ok_or_else(|| IngestionError::invalid_payload("apple", "missing notificationUUID"))?
            .to_string();

        let Some((event_type, status)) =
            map_notification(&notification_type, subtype.as_deref())
        else {
            debug!(
                notification_type = %notification_type,
                subtype = subtype.as_deref().unwrap_or(""),
                "unhandled apple notification, skipping"
            );
            return Ok(Vec::new());
        };

        let transaction = payload["data"]["signedTransactionInfo"]
            .as_str()
            .map(decode_payload)
            .transpose()?
            .unwrap_or(Value::Null);

        let ms = |v: &Value| v.as_i64().and_then(|m| Utc.timestamp_millis_opt(m).single());
        let event_time = ms(&payload["signedDate"])
            .or_else(|| ms(&transaction["purchaseDate"]))
            .unwrap_or_else(Utc::now);

        let native = match &subtype {
            Some(s) => format!("{notification_type}:{s}"),
            None => notification_type.clone(),
        };

        let mut event = NormalizedEvent::new(
            BillingSource::Apple,
            event_type,
            native,
            event_time,
            idempotency_key(BillingSource::Apple, &notification_uuid),
            payload.clone(),
        );
        event.status = status;
        event.external_event_id = Some(notification_uuid);
        event.original_transaction_id = transaction["originalTransactionId"]
            .as_str()
            .map(str::to_string);
        event.external_subscription_id = event.original_transaction_id.clone();
        event.subscription_group_id = transaction["subscriptionGroupIdentifier"]
            .as_str()
            .map(str::to_string);
        event.external_product_id = transaction["productId"].as_str().map(str::to_string);
        event.plan_tier = transaction["productId"]
            .as_str()
            .map(plan_tier_from_product_id);
        event.period_start = ms(&transaction["purchaseDate"]);
        event.period_end = ms(&transaction["expiresDate"]);
        event.expiration_time = ms(&transaction["expiresDate"]);
        event.amount_cents = transaction["price"].as_i64();
        event.currency = transaction["currency"].as_str().map(str::to_string);
        event.country_code = transaction["storefront"].as_str().map(str::to_string);
        if transaction["offerType"].as_i64() == Some(1) {
            event.trial_started_at = ms(&transaction["purchaseDate"]);
        }
        if payload["data"]["environment"].as_str() == Some("Sandbox") {
            event.environment = ProviderEnvironment::Sandbox;
        }
        event.identity_hints = self.extract_identity_hints(&transaction);

        Ok(vec![event])
    }

    fn extract_identity_hints(&self, payload: &Value) -> Vec<IdentityHint> {
        let mut hints = Vec::new();
        if let Some(otid) = payload["originalTransactionId"].as_str() {
            hints.push(IdentityHint::new(
                BillingSource::Apple,
                IdType::OriginalTransactionId,
                otid,
            ));
        }
        if let Some(token) = payload["appAccountToken"].as_str() {
            hints.push(IdentityHint::new(
                BillingSource::Apple,
                IdType::AppUserId,
                token,
            ));
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Build an unsigned JWS-shaped token (header.payload.signature) for
    /// payload-decoding tests; verification tests use malformed inputs.
    fn fake_jws(payload: &Value) -> String {
        let header = BASE64_URL.encode(br#"{"alg":"ES256","x5c":[]}"#);
        let body = BASE64_URL.encode(serde_json::to_vec(payload).unwrap());
        format!("{header}.{body}.c2ln")
    }

    fn notification(notification_type: &str, subtype: Option<&str>, offer_type: Option<i64>) -> String {
        let transaction = json!({
            "originalTransactionId": "1000000001",
            "transactionId": "2000000001",
            "productId": "com.example.app.premium.monthly",
            "subscriptionGroupIdentifier": "group1",
            "purchaseDate": 1_750_000_000_000i64,
            "expiresDate": 1_752_592_000_000i64,
            "price": 9990,
            "currency": "USD",
            "storefront": "USA",
            "offerType": offer_type,
            "appAccountToken": "user-42"
        });
        let mut payload = json!({
            "notificationType": notification_type,
            "notificationUUID": "uuid-1",
            "signedDate": 1_750_000_100_000i64,
            "data": {
                "environment": "Production",
                "bundleId": "com.example.app",
                "signedTransactionInfo": fake_jws(&transaction)
            }
        });
        if let Some(s) = subtype {
            payload["subtype"] = json!(s);
        }
        json!({ "signedPayload": fake_jws(&payload) }).to_string()
    }

    #[tokio::test]
    async fn initial_buy_maps_to_purchase_with_tier_from_product_id() {
        let normalizer = AppleNormalizer::new();
        let webhook = InboundWebhook::new(notification("SUBSCRIBED", Some("INITIAL_BUY"), None));
        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventType::Purchase);
        assert_eq!(event.plan_tier.as_deref(), Some("monthly"));
        assert_eq!(event.idempotency_key, "apple:uuid-1");
        assert_eq!(
            event.original_transaction_id.as_deref(),
            Some("1000000001")
        );
        assert!(event.trial_started_at.is_none());
        let id_types: Vec<IdType> = event.identity_hints.iter().map(|h| h.id_type).collect();
        assert!(id_types.contains(&IdType::OriginalTransactionId));
        assert!(id_types.contains(&IdType::AppUserId));
    }

    #[tokio::test]
    async fn free_trial_offer_sets_trial_started_at() {
        let normalizer = AppleNormalizer::new();
        let webhook = InboundWebhook::new(notification("SUBSCRIBED", Some("INITIAL_BUY"), Some(1)));
        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
            .await
            .unwrap();
        assert!(events[0].trial_started_at.is_some());
    }

    #[tokio::test]
    async fn notification_type_mapping_table() {
        let normalizer = AppleNormalizer::new();
        let cases = [
            ("DID_RENEW", None, EventType::Renewal),
            ("DID_FAIL_TO_RENEW", None, EventType::BillingRetry),
            ("DID_FAIL_TO_RENEW", Some("GRACE_PERIOD"), EventType::GracePeriodStart),
            ("EXPIRED", None, EventType::Expiration),
            ("REFUND", None, EventType::Refund),
            ("GRACE_PERIOD_EXPIRES", None, EventType::GracePeriodStart),
            ("OFFER_REDEEMED", None, EventType::OfferRedeemed),
            ("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_DISABLED"), EventType::Cancellation),
            ("DID_CHANGE_RENEWAL_STATUS", Some("AUTO_RENEW_ENABLED"), EventType::Resume),
            ("REVOKE", None, EventType::Revoke),
        ];
        for (notification_type, subtype, expected) in cases {
            let webhook = InboundWebhook::new(notification(notification_type, subtype, None));
            let events = normalizer
                .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
                .await
                .unwrap();
            assert_eq!(events.len(), 1, "{notification_type}");
            assert_eq!(events[0].event_type, expected, "{notification_type}");
        }
    }

    #[tokio::test]
    async fn unknown_notification_type_is_skipped() {
        let normalizer = AppleNormalizer::new();
        let webhook = InboundWebhook::new(notification("TEST", None, None));
        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn verification_rejects_token_without_chain() {
        let normalizer = AppleNormalizer::new();
        let webhook = InboundWebhook::new(notification("DID_RENEW", None, None));
        // fake_jws carries an empty x5c chain, which must not verify
        let err = normalizer
            .verify_signature(&webhook, &ConnectionContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::SignatureVerification { .. }));
    }

    #[tokio::test]
    async fn verification_rejects_garbage_body() {
        let normalizer = AppleNormalizer::new();
        let webhook = InboundWebhook::new(r#"{"signedPayload": "not-a-jws"}"#);
        assert!(normalizer
            .verify_signature(&webhook, &ConnectionContext::default())
            .await
            .is_err());
    }

    #[test]
    fn plan_tier_is_last_dot_segment() {
        assert_eq!(plan_tier_from_product_id("com.app.premium.annual"), "annual");
        assert_eq!(plan_tier_from_product_id("basic"), "basic");
    }
}
