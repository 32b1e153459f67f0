//! Recurly webhook normalizer
//!
//! Recurly delivers JSON with an `event_type` discriminator and signs the
//! body with HMAC-SHA256 carried in the `recurly-signature` header.

use super::{idempotency_key, ConnectionContext, InboundWebhook, Normalizer};
use crate::error::{IngestionError, IngestionResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revback_shared::{
    BillingSource, EventStatus, EventType, IdType, IdentityHint, NormalizedEvent,
};
use revback_security::verify_hmac_hex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

const SIGNATURE_HEADER: &str = "recurly-signature";

pub struct RecurlyNormalizer;

impl RecurlyNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RecurlyNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

fn map_event_type(native: &str) -> Option<(EventType, EventStatus)> {
    match native {
        "new_subscription" | "subscription_created" => {
            Some((EventType::Purchase, EventStatus::Success))
        }
        "renewed_subscription" | "subscription_renewed" => {
            Some((EventType::Renewal, EventStatus::Success))
        }
        "canceled_subscription" | "subscription_canceled" => {
            Some((EventType::Cancellation, EventStatus::Success))
        }
        "expired_subscription" | "subscription_expired" => {
            Some((EventType::Expiration, EventStatus::Success))
        }
        "reactivated_subscription" => Some((EventType::Resume, EventStatus::Success)),
        "subscription_paused" => Some((EventType::Pause, EventStatus::Success)),
        "subscription_resumed" => Some((EventType::Resume, EventStatus::Success)),
        "refunded_transaction" | "refund" => Some((EventType::Refund, EventStatus::Refunded)),
        "failed_payment" | "failed_transaction" => {
            Some((EventType::BillingRetry, EventStatus::Failed))
        }
        "chargeback" | "new_dispute" => Some((EventType::Chargeback, EventStatus::Refunded)),
        "trial_started" => Some((EventType::TrialStart, EventStatus::Success)),
        "trial_converted" => Some((EventType::TrialConversion, EventStatus::Success)),
        _ => None,
    }
}

#[async_trait]
impl Normalizer for RecurlyNormalizer {
    fn source(&self) -> BillingSource {
        BillingSource::Recurly
    }

    async fn verify_signature(
        &self,
        webhook: &InboundWebhook,
        ctx: &ConnectionContext,
    ) -> IngestionResult<()> {
        let signature = webhook
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| IngestionError::signature("recurly", "missing signature header"))?;
        if verify_hmac_hex(ctx.secret()?.as_bytes(), webhook.body.as_bytes(), signature) {
            Ok(())
        } else {
            Err(IngestionError::signature("recurly", "signature mismatch"))
        }
    }

    async fn normalize(
        &self,
        _org_id: Uuid,
        webhook: &InboundWebhook,
        _ctx: &ConnectionContext,
    ) -> IngestionResult<Vec<NormalizedEvent>> {
        let payload: Value = serde_json::from_str(&webhook.body)
            .map_err(|e| IngestionError::invalid_payload("recurly", e.to_string()))?;

        let native = payload["event_type"]
            .as_str()
            .ok_or_else(|| IngestionError::invalid_payload("recurly", "missing event_type"))?
            .to_string();
        let Some((event_type, status)) = map_event_type(&native) else {
            debug!(native_type = %native, "unhandled recurly event type, skipping");
            return Ok(Vec::new());
        };

        let event_id = payload["id"]
            .as_str()
            .or_else(|| payload["uuid"].as_str())
            .ok_or_else(|| IngestionError::invalid_payload("recurly", "missing event id"))?
            .to_string();
        let event_time = payload["event_time"]
            .as_str()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now);

        let subscription = &payload["data"]["subscription"];
        let transaction = &payload["data"]["transaction"];

        let mut event = NormalizedEvent::new(
            BillingSource::Recurly,
            event_type,
            native,
            event_time,
            idempotency_key(BillingSource::Recurly, &event_id),
            payload.clone(),
        );
        event.status = status;
        event.external_event_id = Some(event_id);
        event.external_subscription_id = subscription["id"]
            .as_str()
            .or_else(|| subscription["uuid"].as_str())
            .map(str::to_string);
        event.external_product_id = subscription["plan"]["code"].as_str().map(str::to_string);
        event.plan_tier = subscription["plan"]["name"]
            .as_str()
            .or_else(|| subscription["plan"]["code"].as_str())
            .map(str::to_string);
        event.billing_interval = match subscription["plan"]["interval_unit"].as_str() {
            Some("months") => Some("month".to_string()),
            Some("days") => Some("day".to_string()),
            other => other.map(str::to_string),
        };
        let parse_time = |v: &Value| {
            v.as_str()
                .and_then(|s| s.parse::<DateTime<Utc>>().ok())
        };
        event.period_start = parse_time(&subscription["current_period_started_at"]);
        event.period_end = parse_time(&subscription["current_period_ends_at"]);
        event.expiration_time = parse_time(&subscription["expires_at"]).or(event.period_end);
        event.trial_started_at = parse_time(&subscription["trial_started_at"]);

        event.amount_cents = transaction["amount_in_cents"]
            .as_i64()
            .or_else(|| subscription["unit_amount_in_cents"].as_i64());
        event.currency = transaction["currency"]
            .as_str()
            .or_else(|| subscription["currency"].as_str())
            .map(str::to_string);

        event.identity_hints = self.extract_identity_hints(&payload);
        Ok(vec![event])
    }

    fn extract_identity_hints(&self, payload: &Value) -> Vec<IdentityHint> {
        let account = &payload["data"]["account"];
        let mut hints = Vec::new();
        if let Some(code) = account["code"].as_str() {
            hints.push(IdentityHint::new(
                BillingSource::Recurly,
                IdType::AppUserId,
                code,
            ));
        }
        if let Some(email) = account["email"].as_str() {
            hints.push(IdentityHint::new(
                BillingSource::Recurly,
                IdType::Email,
                email,
            ));
        }
        hints
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use revback_security::hmac_sha256_hex;
    use serde_json::json;

    const SECRET: &str = "recurly_webhook_secret";

    fn ctx() -> ConnectionContext {
        ConnectionContext {
            webhook_secret: Some(SECRET.to_string()),
            ..Default::default()
        }
    }

    fn body(event_type: &str) -> String {
        json!({
            "id": "rcl-evt-1",
            "event_type": event_type,
            "event_time": "2026-03-01T12:00:00Z",
            "data": {
                "account": { "code": "user-77", "email": "user77@example.com" },
                "subscription": {
                    "id": "sub-recurly-1",
                    "plan": { "code": "pro-monthly", "name": "Pro Monthly", "interval_unit": "months" },
                    "current_period_started_at": "2026-03-01T12:00:00Z",
                    "current_period_ends_at": "2026-04-01T12:00:00Z",
                    "unit_amount_in_cents": 1499,
                    "currency": "USD"
                },
                "transaction": { "amount_in_cents": 1499, "currency": "USD" }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn signature_round_trip() {
        let normalizer = RecurlyNormalizer::new();
        let payload = body("new_subscription");
        let signature = hmac_sha256_hex(SECRET.as_bytes(), payload.as_bytes());
        let webhook =
            InboundWebhook::new(payload.clone()).with_header("recurly-signature", signature);
        assert!(normalizer.verify_signature(&webhook, &ctx()).await.is_ok());

        let bad = InboundWebhook::new(payload).with_header("recurly-signature", "deadbeef");
        assert!(normalizer.verify_signature(&bad, &ctx()).await.is_err());
    }

    #[tokio::test]
    async fn new_subscription_maps_to_purchase() {
        let normalizer = RecurlyNormalizer::new();
        let webhook = InboundWebhook::new(body("new_subscription"));
        let events = normalizer
            .normalize(Uuid::new_v4(), &webhook, &ctx())
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.event_type, EventType::Purchase);
        assert_eq!(event.amount_cents, Some(1499));
        assert_eq!(event.plan_tier.as_deref(), Some("Pro Monthly"));
        assert_eq!(event.billing_interval.as_deref(), Some("month"));
        assert_eq!(event.idempotency_key, "recurly:rcl-evt-1");
        assert_eq!(event.identity_hints.len(), 2);
    }

    #[tokio::test]
    async fn event_type_mapping() {
        let normalizer = RecurlyNormalizer::new();
        let cases = [
            ("renewed_subscription", EventType::Renewal),
            ("canceled_subscription", EventType::Cancellation),
            ("expired_subscription", EventType::Expiration),
            ("refunded_transaction", EventType::Refund),
            ("failed_payment", EventType::BillingRetry),
            ("chargeback", EventType::Chargeback),
            ("reactivated_subscription", EventType::Resume),
        ];
        for (native, expected) in cases {
            let events = normalizer
                .normalize(Uuid::new_v4(), &InboundWebhook::new(body(native)), &ctx())
                .await
                .unwrap();
            assert_eq!(events.len(), 1, "{native}");
            assert_eq!(events[0].event_type, expected, "{native}");
        }
    }

    #[tokio::test]
    async fn unknown_event_type_is_skipped() {
        let normalizer = RecurlyNormalizer::new();
        let events = normalizer
            .normalize(
                Uuid::new_v4(),
                &InboundWebhook::new(body("billing_info_updated")),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
