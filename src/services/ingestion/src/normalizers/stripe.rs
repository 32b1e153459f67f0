//! Stripe webhook normalizer
//!
//! Signature scheme: `Stripe-Signature: t=<epoch>,v1=<hex>` where the
//! digest is HMAC-SHA256 over `"{t}.{body}"`. Signatures older than five
//! minutes are rejected to stop replays.
//!
//! The event-type mapping is many-to-many: `customer.subscription.updated`
//! in particular can emit zero, one or two canonical events depending on
//! its diff against `previous_attributes`.

use super::{idempotency_key, ConnectionContext, InboundWebhook, Normalizer};
use crate::error::{IngestionError, IngestionResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use revback_shared::{
    BillingSource, EventStatus, EventType, IdType, IdentityHint, NormalizedEvent,
};
use revback_security::verify_hmac_hex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

const SIGNATURE_HEADER: &str = "stripe-signature";
const MAX_SKEW_SECONDS: i64 = 300;

pub struct StripeNormalizer;

impl StripeNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Testable entry point with an injected clock
    fn verify_with_now(
        &self,
        webhook: &InboundWebhook,
        secret: &str,
        now: DateTime<Utc>,
    ) -> IngestionResult<()> {
        let header = webhook
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| IngestionError::signature("stripe", "missing Stripe-Signature header"))?;

        let mut timestamp: Option<i64> = None;
        let mut candidates: Vec<&str> = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => candidates.push(value),
                _ => {}
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| IngestionError::signature("stripe", "missing timestamp in header"))?;
        if (now.timestamp() - timestamp).abs() > MAX_SKEW_SECONDS {
            return Err(IngestionError::signature(
                "stripe",
                "timestamp outside tolerance",
            ));
        }
        if candidates.is_empty() {
            return Err(IngestionError::signature("stripe", "no v1 signature present"));
        }

        let signed_payload = format!("{timestamp}.{}", webhook.body);
        for candidate in candidates {
            if verify_hmac_hex(secret.as_bytes(), signed_payload.as_bytes(), candidate) {
                return Ok(());
            }
        }
        Err(IngestionError::signature("stripe", "signature mismatch"))
    }
}

impl Default for StripeNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Normalizer for StripeNormalizer {
    fn source(&self) -> BillingSource {
        BillingSource::Stripe
    }

    async fn verify_signature(
        &self,
        webhook: &InboundWebhook,
        ctx: &ConnectionContext,
    ) -> IngestionResult<()> {
        self.verify_with_now(webhook, ctx.secret()?, Utc::now())
    }

    async fn normalize(
        &self,
        _org_id: Uuid,
        webhook: &InboundWebhook,
        _ctx: &ConnectionContext,
    ) -> IngestionResult<Vec<NormalizedEvent>> {
        let payload: Value = serde_json::from_str(&webhook.body)
            .map_err(|e| IngestionError::invalid_payload("stripe", e.to_string()))?;

        let event_id = payload["id"]
            .as_str()
            .ok_or_else(|| IngestionError::invalid_payload("stripe", "missing event id"))?
            .to_string();
        let native_type = payload["type"]
            .as_str()
            .ok_or_else(|| IngestionError::invalid_payload("stripe", "missing event type"))?
            .to_string();
        let event_time = payload["created"]
            .as_i64()
            .and_then(|s| Utc.timestamp_opt(s, 0).single())
            .unwrap_or_else(Utc::now);
        let object = &payload["data"]["object"];
        let previous = &payload["data"]["previous_attributes"];

        let hints = self.extract_identity_hints(&payload);

        let mut canonical: Vec<(EventType, EventStatus)> = Vec::new();
        match native_type.as_str() {
            "customer.subscription.created" => {
                canonical.push((EventType::Purchase, EventStatus::Success));
                if !object["trial_start"].is_null() {
                    canonical.push((EventType::TrialStart, EventStatus::Success));
                }
            }
            "customer.subscription.updated" => {
                canonical.extend(diff_subscription_update(object, previous));
            }
            "customer.subscription.deleted" => {
                canonical.push((EventType::Expiration, EventStatus::Success));
            }
            "invoice.payment_succeeded" => {
                canonical.push((EventType::Renewal, EventStatus::Success));
            }
            "invoice.payment_failed" => {
                canonical.push((EventType::BillingRetry, EventStatus::Failed));
            }
            "charge.refunded" => {
                canonical.push((EventType::Refund, EventStatus::Refunded));
            }
            "charge.dispute.created" => {
                canonical.push((EventType::Chargeback, EventStatus::Refunded));
            }
            other => {
                debug!(native_type = other, "unhandled stripe event type, skipping");
            }
        }

        let mut events = Vec::with_capacity(canonical.len());
        for (index, (event_type, status)) in canonical.iter().enumerate() {
            let key = if index == 0 && *event_type != EventType::TrialStart {
                idempotency_key(BillingSource::Stripe, &event_id)
            } else {
                format!(
                    "{}:{}",
                    idempotency_key(BillingSource::Stripe, &event_id),
                    event_type.as_str()
                )
            };
            let mut event = NormalizedEvent::new(
                BillingSource::Stripe,
                *event_type,
                native_type.clone(),
                event_time,
                key,
                payload.clone(),
            );
            event.status = *status;
            event.external_event_id = Some(event_id.clone());
            event.identity_hints = hints.clone();
            fill_from_object(&mut event, &native_type, object);
            events.push(event);
        }
        Ok(events)
    }

    fn extract_identity_hints(&self, payload: &Value) -> Vec<IdentityHint> {
        let object = &payload["data"]["object"];
        let mut hints = Vec::new();
        if let Some(customer) = object["customer"].as_str() {
            hints.push(IdentityHint::new(
                BillingSource::Stripe,
                IdType::CustomerId,
                customer,
            ));
        }
        if let Some(email) = object["customer_email"].as_str() {
            hints.push(IdentityHint::new(
                BillingSource::Stripe,
                IdType::Email,
                email,
            ));
        }
        hints
    }
}

/// Diff-driven mapping for `customer.subscription.updated`; zero, one or
/// two canonical events.
fn diff_subscription_update(
    object: &Value,
    previous: &Value,
) -> Vec<(EventType, EventStatus)> {
    let mut out = Vec::new();

    if !previous["cancel_at_period_end"].is_null() {
        if object["cancel_at_period_end"].as_bool() == Some(true) {
            out.push((EventType::Cancellation, EventStatus::Success));
        } else {
            out.push((EventType::Resume, EventStatus::Success));
        }
    }

    if previous["status"].as_str() == Some("trialing")
        && object["status"].as_str() == Some("active")
    {
        out.push((EventType::TrialConversion, EventStatus::Success));
    }

    let prev_price = &previous["items"]["data"][0]["price"];
    if !prev_price.is_null() {
        let current_price = &object["items"]["data"][0]["price"];
        let prev_id = prev_price["id"].as_str();
        let current_id = current_price["id"].as_str();
        if prev_id.is_some() && prev_id != current_id {
            let prev_amount = prev_price["unit_amount"].as_i64();
            let current_amount = current_price["unit_amount"].as_i64();
            let event_type = match (prev_amount, current_amount) {
                (Some(prev), Some(current)) if current > prev => EventType::Upgrade,
                (Some(prev), Some(current)) if current < prev => EventType::Downgrade,
                (Some(_), Some(_)) => EventType::Crossgrade,
                _ => EventType::PriceChange,
            };
            out.push((event_type, EventStatus::Success));
        } else if prev_price["unit_amount"].as_i64().is_some()
            && prev_price["unit_amount"] != current_price["unit_amount"]
        {
            out.push((EventType::PriceChange, EventStatus::Success));
        }
    }

    out
}

/// Monetary, period and plan fields derived from the native object
fn fill_from_object(event: &mut NormalizedEvent, native_type: &str, object: &Value) {
    let epoch = |v: &Value| v.as_i64().and_then(|s| Utc.timestamp_opt(s, 0).single());

    match native_type {
        "invoice.payment_succeeded" => {
            event.amount_cents = object["amount_paid"].as_i64();
            event.currency = object["currency"].as_str().map(str::to_uppercase);
            event.external_subscription_id =
                object["subscription"].as_str().map(str::to_string);
            let period = &object["lines"]["data"][0]["period"];
            event.period_start = epoch(&period["start"]);
            event.period_end = epoch(&period["end"]);
        }
        "invoice.payment_failed" => {
            event.amount_cents = object["amount_due"].as_i64();
            event.currency = object["currency"].as_str().map(str::to_uppercase);
            event.external_subscription_id =
                object["subscription"].as_str().map(str::to_string);
        }
        "charge.refunded" => {
            event.amount_cents = object["amount_refunded"].as_i64();
            event.currency = object["currency"].as_str().map(str::to_uppercase);
        }
        "charge.dispute.created" => {
            event.amount_cents = object["amount"].as_i64();
            event.currency = object["currency"].as_str().map(str::to_uppercase);
        }
        _ => {
            // subscription-shaped objects
            event.external_subscription_id = object["id"].as_str().map(str::to_string);
            event.period_start = epoch(&object["current_period_start"]);
            event.period_end = epoch(&object["current_period_end"]);
            event.cancellation_reason = object["cancellation_details"]["reason"]
                .as_str()
                .map(str::to_string);

            let price = &object["items"]["data"][0]["price"];
            event.billing_interval = price["recurring"]["interval"]
                .as_str()
                .map(str::to_string);
            event.plan_tier = price["nickname"].as_str().map(str::to_string);
            event.external_product_id = price["product"]
                .as_str()
                .or_else(|| price["id"].as_str())
                .map(str::to_string);
            if event.amount_cents.is_none() {
                event.amount_cents = price["unit_amount"].as_i64();
                event.currency = price["currency"].as_str().map(str::to_uppercase);
            }
            if event.event_type == EventType::TrialStart {
                event.trial_started_at = epoch(&object["trial_start"]);
                event.period_end = epoch(&object["trial_end"]).or(event.period_end);
            }
            if event.event_type == EventType::Cancellation {
                event.expiration_time = epoch(&object["current_period_end"]);
            }
        }
    }

    if object["livemode"].as_bool() == Some(false) {
        event.environment = revback_shared::ProviderEnvironment::Sandbox;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revback_security::hmac_sha256_hex;
    use serde_json::json;

    const SECRET: &str = "whsec_test_secret";

    fn sign(body: &str, at: DateTime<Utc>) -> String {
        let t = at.timestamp();
        let digest = hmac_sha256_hex(SECRET.as_bytes(), format!("{t}.{body}").as_bytes());
        format!("t={t},v1={digest}")
    }

    fn ctx() -> ConnectionContext {
        ConnectionContext {
            webhook_secret: Some(SECRET.to_string()),
            ..Default::default()
        }
    }

    fn subscription_created(trialing: bool) -> Value {
        json!({
            "id": "evt_1",
            "type": "customer.subscription.created",
            "created": 1_750_000_000,
            "data": {
                "object": {
                    "id": "sub_1",
                    "customer": "cus_X",
                    "status": if trialing { "trialing" } else { "active" },
                    "trial_start": if trialing { json!(1_750_000_000) } else { Value::Null },
                    "trial_end": if trialing { json!(1_750_604_800) } else { Value::Null },
                    "current_period_start": 1_750_000_000,
                    "current_period_end": 1_752_592_000,
                    "livemode": true,
                    "items": {
                        "data": [{
                            "price": {
                                "id": "price_1",
                                "product": "prod_1",
                                "nickname": "Monthly Pro",
                                "unit_amount": 1999,
                                "currency": "usd",
                                "recurring": { "interval": "month" }
                            }
                        }]
                    }
                }
            }
        })
    }

    #[test]
    fn signature_verifies_and_rejects_tampering() {
        let normalizer = StripeNormalizer::new();
        let now = Utc::now();
        let body = r#"{"id":"evt_1"}"#;
        let webhook =
            InboundWebhook::new(body).with_header("Stripe-Signature", sign(body, now));
        assert!(normalizer.verify_with_now(&webhook, SECRET, now).is_ok());

        let tampered =
            InboundWebhook::new(r#"{"id":"evt_2"}"#).with_header("Stripe-Signature", sign(body, now));
        assert!(normalizer.verify_with_now(&tampered, SECRET, now).is_err());
    }

    #[test]
    fn stale_signature_is_rejected() {
        let normalizer = StripeNormalizer::new();
        let now = Utc::now();
        let body = "{}";
        let old = now - chrono::Duration::seconds(MAX_SKEW_SECONDS + 1);
        let webhook = InboundWebhook::new(body).with_header("Stripe-Signature", sign(body, old));
        assert!(normalizer.verify_with_now(&webhook, SECRET, now).is_err());
    }

    #[tokio::test]
    async fn subscription_created_maps_to_purchase_with_plan_metadata() {
        let normalizer = StripeNormalizer::new();
        let body = subscription_created(false).to_string();
        let webhook = InboundWebhook::new(body);

        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ctx())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventType::Purchase);
        assert_eq!(event.plan_tier.as_deref(), Some("Monthly Pro"));
        assert_eq!(event.billing_interval.as_deref(), Some("month"));
        assert_eq!(event.idempotency_key, "stripe:evt_1");
        assert_eq!(event.external_subscription_id.as_deref(), Some("sub_1"));
        assert_eq!(event.identity_hints.len(), 1);
        assert_eq!(event.identity_hints[0].external_id, "cus_X");
        assert_eq!(event.identity_hints[0].id_type, IdType::CustomerId);
    }

    #[tokio::test]
    async fn trialing_subscription_also_emits_trial_start() {
        let normalizer = StripeNormalizer::new();
        let body = subscription_created(true).to_string();
        let webhook = InboundWebhook::new(body);

        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ctx())
            .await
            .unwrap();
        let types: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(types, vec![EventType::Purchase, EventType::TrialStart]);
        // the two events carry distinct idempotency keys
        assert_ne!(events[0].idempotency_key, events[1].idempotency_key);
        assert!(events[1].trial_started_at.is_some());
    }

    #[tokio::test]
    async fn cancel_at_period_end_toggle_maps_to_cancellation() {
        let normalizer = StripeNormalizer::new();
        let body = json!({
            "id": "evt_2",
            "type": "customer.subscription.updated",
            "created": 1_750_000_000,
            "data": {
                "object": {
                    "id": "sub_1",
                    "customer": "cus_X",
                    "status": "active",
                    "cancel_at_period_end": true,
                    "current_period_end": 1_752_592_000,
                    "items": {"data": [{"price": {"id": "price_1", "nickname": "Monthly Pro",
                        "unit_amount": 1999, "currency": "usd",
                        "recurring": {"interval": "month"}}}]}
                },
                "previous_attributes": { "cancel_at_period_end": false }
            }
        })
        .to_string();
        let events = normalizer
            .normalize(Uuid::new_v4(), &InboundWebhook::new(body), &ctx())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Cancellation);
        assert!(events[0].expiration_time.is_some());
    }

    #[tokio::test]
    async fn trialing_to_active_maps_to_trial_conversion() {
        let normalizer = StripeNormalizer::new();
        let body = json!({
            "id": "evt_3",
            "type": "customer.subscription.updated",
            "created": 1_750_000_000,
            "data": {
                "object": {
                    "id": "sub_1", "customer": "cus_X", "status": "active",
                    "items": {"data": [{"price": {"id": "price_1", "unit_amount": 1999,
                        "currency": "usd", "recurring": {"interval": "month"}}}]}
                },
                "previous_attributes": { "status": "trialing" }
            }
        })
        .to_string();
        let events = normalizer
            .normalize(Uuid::new_v4(), &InboundWebhook::new(body), &ctx())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::TrialConversion);
    }

    #[tokio::test]
    async fn price_increase_maps_to_upgrade() {
        let normalizer = StripeNormalizer::new();
        let body = json!({
            "id": "evt_4",
            "type": "customer.subscription.updated",
            "created": 1_750_000_000,
            "data": {
                "object": {
                    "id": "sub_1", "customer": "cus_X", "status": "active",
                    "items": {"data": [{"price": {"id": "price_2", "unit_amount": 4999,
                        "currency": "usd", "recurring": {"interval": "month"}}}]}
                },
                "previous_attributes": {
                    "items": {"data": [{"price": {"id": "price_1", "unit_amount": 1999}}]}
                }
            }
        })
        .to_string();
        let events = normalizer
            .normalize(Uuid::new_v4(), &InboundWebhook::new(body), &ctx())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Upgrade);
    }

    #[tokio::test]
    async fn invoice_payment_succeeded_maps_to_renewal() {
        let normalizer = StripeNormalizer::new();
        let body = json!({
            "id": "evt_5",
            "type": "invoice.payment_succeeded",
            "created": 1_750_000_000,
            "data": {
                "object": {
                    "customer": "cus_X",
                    "subscription": "sub_1",
                    "amount_paid": 1999,
                    "currency": "usd",
                    "lines": {"data": [{"period": {"start": 1_750_000_000, "end": 1_752_592_000}}]}
                }
            }
        })
        .to_string();
        let events = normalizer
            .normalize(Uuid::new_v4(), &InboundWebhook::new(body), &ctx())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Renewal);
        assert_eq!(events[0].amount_cents, Some(1999));
        assert_eq!(events[0].currency.as_deref(), Some("USD"));
        assert!(events[0].period_end.is_some());
    }

    #[tokio::test]
    async fn refund_and_dispute_map_to_refund_and_chargeback() {
        let normalizer = StripeNormalizer::new();
        for (native, expected, amount_field) in [
            ("charge.refunded", EventType::Refund, "amount_refunded"),
            ("charge.dispute.created", EventType::Chargeback, "amount"),
        ] {
            let body = json!({
                "id": "evt_6",
                "type": native,
                "created": 1_750_000_000,
                "data": {"object": {"customer": "cus_X", amount_field: 999, "currency": "usd"}}
            })
            .to_string();
            let events = normalizer
                .normalize(Uuid::new_v4(), &InboundWebhook::new(body), &ctx())
                .await
                .unwrap();
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, expected);
            assert_eq!(events[0].amount_cents, Some(999));
            assert_eq!(events[0].status, EventStatus::Refunded);
        }
    }

    #[tokio::test]
    async fn unknown_native_type_is_skipped() {
        let normalizer = StripeNormalizer::new();
        let body = json!({
            "id": "evt_7",
            "type": "payment_intent.created",
            "created": 1_750_000_000,
            "data": {"object": {}}
        })
        .to_string();
        let events = normalizer
            .normalize(Uuid::new_v4(), &InboundWebhook::new(body), &ctx())
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
