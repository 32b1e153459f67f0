//! Google Play RTDN normalizer
//!
//! Inbound is a Cloud Pub/Sub push envelope whose `message.data` is a
//! base64-encoded DeveloperNotification. Authenticity comes from the push
//! subscription's `Authorization: Bearer <JWT>`: verified against Google's
//! JWKS, audience must equal the configured endpoint URL, and the `email`
//! claim must be a service account.

use super::google_play::{GooglePlayClient, ServiceAccountKey};
use super::{idempotency_key, ConnectionContext, InboundWebhook, Normalizer};
use crate::error::{IngestionError, IngestionResult};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use revback_shared::{
    BillingSource, EventStatus, EventType, IdType, IdentityHint, NormalizedEvent,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

pub struct GoogleNormalizer {
    http: reqwest::Client,
    jwks_url: String,
    jwks_cache: Arc<RwLock<Option<(Instant, Value)>>>,
    enricher: Option<Arc<GooglePlayClient>>,
}

impl GoogleNormalizer {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            jwks_url: GOOGLE_JWKS_URL.to_string(),
            jwks_cache: Arc::new(RwLock::new(None)),
            enricher: None,
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<GooglePlayClient>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    /// Override the JWKS endpoint; test seam
    pub fn with_jwks_url(mut self, url: String) -> Self {
        self.jwks_url = url;
        self
    }

    async fn jwks(&self) -> IngestionResult<Value> {
        {
            let cache = self.jwks_cache.read().await;
            if let Some((fetched_at, jwks)) = cache.as_ref() {
                if fetched_at.elapsed() < JWKS_CACHE_TTL {
                    return Ok(jwks.clone());
                }
            }
        }
        let jwks: Value = self
            .http
            .get(&self.jwks_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await?
            .json()
            .await?;
        *self.jwks_cache.write().await = Some((Instant::now(), jwks.clone()));
        Ok(jwks)
    }
}

/// Claim checks beyond the cryptographic verification
fn validate_claims(claims: &Value, endpoint_url: &str) -> IngestionResult<()> {
    let aud = claims["aud"].as_str().unwrap_or_default();
    if aud != endpoint_url {
        return Err(IngestionError::signature(
            "google",
            format!("audience mismatch: {aud}"),
        ));
    }
    let email = claims["email"].as_str().unwrap_or_default();
    if !email.ends_with(".gserviceaccount.com") {
        return Err(IngestionError::signature(
            "google",
            "bearer is not a service account",
        ));
    }
    if claims["email_verified"].as_bool() != Some(true) {
        return Err(IngestionError::signature("google", "email not verified"));
    }
    Ok(())
}

/// Map a `subscriptionNotification.notificationType` code. Codes 9 and 11
/// (pause schedule changes) are intentionally unmapped.
fn map_notification_code(code: i64) -> Option<(EventType, EventStatus)> {
    match code {
        1 | 2 => Some((EventType::Renewal, EventStatus::Success)),
        3 => Some((EventType::Cancellation, EventStatus::Success)),
        4 => Some((EventType::Purchase, EventStatus::Success)),
        5 => Some((EventType::BillingRetry, EventStatus::Failed)),
        6 => Some((EventType::GracePeriodStart, EventStatus::Success)),
        7 => Some((EventType::Resume, EventStatus::Success)),
        8 => Some((EventType::PriceChange, EventStatus::Success)),
        10 => Some((EventType::Pause, EventStatus::Success)),
        12 => Some((EventType::Revoke, EventStatus::Refunded)),
        13 => Some((EventType::Expiration, EventStatus::Success)),
        _ => None,
    }
}

fn plan_tier_from_subscription_id(subscription_id: &str) -> String {
    subscription_id
        .rsplit('.')
        .next()
        .unwrap_or(subscription_id)
        .to_string()
}

#[async_trait]
impl Normalizer for GoogleNormalizer {
    fn source(&self) -> BillingSource {
        BillingSource::Google
    }

    async fn verify_signature(
        &self,
        webhook: &InboundWebhook,
        ctx: &ConnectionContext,
    ) -> IngestionResult<()> {
        let authorization = webhook
            .header("authorization")
            .ok_or_else(|| IngestionError::signature("google", "missing Authorization header"))?;
        let token = authorization
            .strip_prefix("Bearer ")
            .ok_or_else(|| IngestionError::signature("google", "not a bearer token"))?;

        let endpoint_url = ctx.endpoint_url.as_deref().ok_or_else(|| {
            IngestionError::signature("google", "endpoint URL not configured for audience check")
        })?;

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| IngestionError::signature("google", format!("bad JWT header: {e}")))?;
        let kid = header
            .kid
            .ok_or_else(|| IngestionError::signature("google", "missing kid"))?;

        let jwks = self.jwks().await?;
        let empty = Vec::new();
        let key = jwks["keys"]
            .as_array()
            .unwrap_or(&empty)
            .iter()
            .find(|k| k["kid"].as_str() == Some(kid.as_str()))
            .ok_or_else(|| IngestionError::signature("google", "no JWKS key for kid"))?;
        let n = key["n"].as_str().unwrap_or_default();
        let e = key["e"].as_str().unwrap_or_default();
        let decoding_key = DecodingKey::from_rsa_components(n, e)
            .map_err(|e| IngestionError::signature("google", format!("bad JWKS key: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[endpoint_url]);
        let decoded = jsonwebtoken::decode::<Value>(token, &decoding_key, &validation)
            .map_err(|e| IngestionError::signature("google", format!("JWT invalid: {e}")))?;

        validate_claims(&decoded.claims, endpoint_url)
    }

    async fn normalize(
        &self,
        _org_id: Uuid,
        webhook: &InboundWebhook,
        ctx: &ConnectionContext,
    ) -> IngestionResult<Vec<NormalizedEvent>> {
        let envelope: Value = serde_json::from_str(&webhook.body)
            .map_err(|e| IngestionError::invalid_payload("google", e.to_string()))?;
        let message_id = envelope["message"]["messageId"]
            .as_str()
            .or_else(|| envelope["message"]["message_id"].as_str())
            .unwrap_or("unknown")
            .to_string();
        let data = envelope["message"]["data"]
            .as_str()
            .ok_or_else(|| IngestionError::invalid_payload("google", "missing message.data"))?;
        let decoded = BASE64
            .decode(data)
            .map_err(|e| IngestionError::invalid_payload("google", format!("data: {e}")))?;
        let notification: Value = serde_json::from_slice(&decoded)
            .map_err(|e| IngestionError::invalid_payload("google", e.to_string()))?;

        let package_name = notification["packageName"].as_str().unwrap_or_default();
        let event_time = notification["eventTimeMillis"]
            .as_str()
            .and_then(|s| s.parse::<i64>().ok())
            .or_else(|| notification["eventTimeMillis"].as_i64())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        if !notification["testNotification"].is_null() {
            debug!("google test notification, skipping");
            return Ok(Vec::new());
        }

        if !notification["voidedPurchaseNotification"].is_null() {
            let voided = &notification["voidedPurchaseNotification"];
            let order_id = voided["orderId"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| message_id.clone());
            let purchase_token = voided["purchaseToken"].as_str().map(str::to_string);
            let event_type = if voided["refundType"].as_i64() == Some(1) {
                EventType::Refund
            } else {
                EventType::Chargeback
            };
            let mut event = NormalizedEvent::new(
                BillingSource::Google,
                event_type,
                "voidedPurchaseNotification".to_string(),
                event_time,
                format!("google:voided:{order_id}"),
                json!({ "notification": notification, "pubsubMessageId": message_id }),
            );
            event.status = EventStatus::Refunded;
            event.external_event_id = Some(order_id);
            if let Some(token) = purchase_token {
                event.identity_hints.push(IdentityHint::new(
                    BillingSource::Google,
                    IdType::PurchaseToken,
                    &token,
                ));
                event.external_subscription_id = Some(token);
            }
            return Ok(vec![event]);
        }

        let subscription = &notification["subscriptionNotification"];
        if subscription.is_null() {
            debug!("google notification without subscription payload, skipping");
            return Ok(Vec::new());
        }

        let code = subscription["notificationType"].as_i64().unwrap_or(0);
        let Some((event_type, status)) = map_notification_code(code) else {
            debug!(code, "unmapped google notification code, skipping");
            return Ok(Vec::new());
        };

        let purchase_token = subscription["purchaseToken"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let subscription_id = subscription["subscriptionId"]
            .as_str()
            .unwrap_or_default()
            .to_string();

        // enrichment is best-effort; failure degrades to the bare event
        let details = match (&self.enricher, ctx.credentials.as_ref()) {
            (Some(enricher), Some(credentials)) if !purchase_token.is_empty() => {
                match serde_json::from_value::<ServiceAccountKey>(credentials.clone()) {
                    Ok(key) => {
                        enricher
                            .get_subscription_v2(&key, package_name, &purchase_token)
                            .await
                    }
                    Err(_) => None,
                }
            }
            _ => None,
        };

        let mut event = NormalizedEvent::new(
            BillingSource::Google,
            event_type,
            format!("subscriptionNotification:{code}"),
            event_time,
            idempotency_key(BillingSource::Google, &message_id),
            json!({
                "notification": notification,
                "pubsubMessageId": message_id.clone(),
                "subscriptionDetails": details.clone(),
            }),
        );
        event.status = status;
        event.external_event_id = Some(message_id);
        event.external_subscription_id = Some(purchase_token.clone());
        event.external_product_id = Some(subscription_id.clone());
        event.plan_tier = Some(plan_tier_from_subscription_id(&subscription_id));
        if !purchase_token.is_empty() {
            event.identity_hints.push(IdentityHint::new(
                BillingSource::Google,
                IdType::PurchaseToken,
                &purchase_token,
            ));
        }

        if let Some(details) = details.as_ref().and_then(Value::as_object) {
            if let Some(linked) = details
                .get("linkedPurchaseToken")
                .and_then(Value::as_str)
            {
                event.identity_hints.push(IdentityHint::new(
                    BillingSource::Google,
                    IdType::LinkedPurchaseToken,
                    linked,
                ));
            }
            if let Some(expiry) = details
                .get("lineItems")
                .and_then(|items| items.get(0))
                .and_then(|item| item.get("expiryTime"))
                .and_then(Value::as_str)
            {
                if let Ok(parsed) = expiry.parse::<chrono::DateTime<Utc>>() {
                    event.period_end = Some(parsed);
                    event.expiration_time = Some(parsed);
                }
            }
            if let Some(region) = details.get("regionCode").and_then(Value::as_str) {
                event.country_code = Some(region.to_string());
            }
        }

        Ok(vec![event])
    }

    fn extract_identity_hints(&self, payload: &Value) -> Vec<IdentityHint> {
        let mut hints = Vec::new();
        if let Some(token) = payload["subscriptionNotification"]["purchaseToken"].as_str() {
            hints.push(IdentityHint::new(
                BillingSource::Google,
                IdType::PurchaseToken,
                token,
            ));
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(notification: &Value) -> String {
        json!({
            "message": {
                "messageId": "msg-1",
                "data": BASE64.encode(serde_json::to_vec(notification).unwrap()),
                "publishTime": "2026-03-01T00:00:00Z"
            },
            "subscription": "projects/p/subscriptions/s"
        })
        .to_string()
    }

    fn subscription_notification(code: i64) -> Value {
        json!({
            "version": "1.0",
            "packageName": "com.example.app",
            "eventTimeMillis": "1750000000000",
            "subscriptionNotification": {
                "version": "1.0",
                "notificationType": code,
                "purchaseToken": "token-abc",
                "subscriptionId": "premium.monthly"
            }
        })
    }

    #[tokio::test]
    async fn purchased_maps_to_purchase_with_tier_from_subscription_id() {
        let normalizer = GoogleNormalizer::new(reqwest::Client::new());
        let webhook = InboundWebhook::new(envelope(&subscription_notification(4)));
        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventType::Purchase);
        assert_eq!(event.plan_tier.as_deref(), Some("monthly"));
        assert_eq!(event.idempotency_key, "google:msg-1");
        // no credentials configured: enrichment is null, not an error
        assert!(event.raw_payload["subscriptionDetails"].is_null());
        assert_eq!(event.identity_hints[0].id_type, IdType::PurchaseToken);
    }

    #[tokio::test]
    async fn notification_code_table() {
        let normalizer = GoogleNormalizer::new(reqwest::Client::new());
        let cases = [
            (1, Some(EventType::Renewal)),
            (2, Some(EventType::Renewal)),
            (3, Some(EventType::Cancellation)),
            (4, Some(EventType::Purchase)),
            (5, Some(EventType::BillingRetry)),
            (6, Some(EventType::GracePeriodStart)),
            (7, Some(EventType::Resume)),
            (8, Some(EventType::PriceChange)),
            (9, None),
            (10, Some(EventType::Pause)),
            (11, None),
            (12, Some(EventType::Revoke)),
            (13, Some(EventType::Expiration)),
        ];
        for (code, expected) in cases {
            let webhook = InboundWebhook::new(envelope(&subscription_notification(code)));
            let events = normalizer
                .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
                .await
                .unwrap();
            match expected {
                Some(event_type) => {
                    assert_eq!(events.len(), 1, "code {code}");
                    assert_eq!(events[0].event_type, event_type, "code {code}");
                }
                None => assert!(events.is_empty(), "code {code} must be skipped"),
            }
        }
    }

    #[tokio::test]
    async fn voided_purchase_maps_refund_type() {
        let normalizer = GoogleNormalizer::new(reqwest::Client::new());
        for (refund_type, expected) in [(1, EventType::Refund), (2, EventType::Chargeback)] {
            let notification = json!({
                "packageName": "com.example.app",
                "eventTimeMillis": "1750000000000",
                "voidedPurchaseNotification": {
                    "purchaseToken": "token-abc",
                    "orderId": "GPA.1234",
                    "productType": 1,
                    "refundType": refund_type
                }
            });
            let webhook = InboundWebhook::new(envelope(&notification));
            let events = normalizer
                .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
                .await
                .unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, expected);
            assert_eq!(events[0].idempotency_key, "google:voided:GPA.1234");
        }
    }

    #[tokio::test]
    async fn test_notification_is_skipped() {
        let normalizer = GoogleNormalizer::new(reqwest::Client::new());
        let notification = json!({
            "packageName": "com.example.app",
            "eventTimeMillis": "1750000000000",
            "testNotification": { "version": "1.0" }
        });
        let webhook = InboundWebhook::new(envelope(&notification));
        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ConnectionContext::default())
            .await
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn claim_validation_enforces_audience_and_service_account() {
        let good = json!({
            "aud": "https://api.example.com/webhooks/acme/google",
            "email": "push@project.iam.gserviceaccount.com",
            "email_verified": true
        });
        assert!(validate_claims(&good, "https://api.example.com/webhooks/acme/google").is_ok());

        let wrong_aud = json!({
            "aud": "https://evil.example.com",
            "email": "push@project.iam.gserviceaccount.com",
            "email_verified": true
        });
        assert!(validate_claims(&wrong_aud, "https://api.example.com/webhooks/acme/google").is_err());

        let not_service_account = json!({
            "aud": "https://api.example.com/webhooks/acme/google",
            "email": "someone@gmail.com",
            "email_verified": true
        });
        assert!(
            validate_claims(&not_service_account, "https://api.example.com/webhooks/acme/google")
                .is_err()
        );
    }
}
