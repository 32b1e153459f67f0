//! Canonical billing event types
//!
//! A [`NormalizedEvent`] is what a provider normalizer emits from a raw
//! webhook payload; a [`CanonicalEvent`] is the persisted, idempotent row
//! built from it. The canonical event-type vocabulary is closed: normalizers
//! emit exactly these variants and nothing else.

use super::core::{BillingSource, IdType, ProviderEnvironment, UnknownVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Provider-independent billing event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Purchase,
    Renewal,
    Cancellation,
    Refund,
    Chargeback,
    GracePeriodStart,
    GracePeriodEnd,
    BillingRetry,
    Expiration,
    TrialStart,
    TrialConversion,
    Upgrade,
    Downgrade,
    Crossgrade,
    Pause,
    Resume,
    Revoke,
    OfferRedeemed,
    PriceChange,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Renewal => "renewal",
            Self::Cancellation => "cancellation",
            Self::Refund => "refund",
            Self::Chargeback => "chargeback",
            Self::GracePeriodStart => "grace_period_start",
            Self::GracePeriodEnd => "grace_period_end",
            Self::BillingRetry => "billing_retry",
            Self::Expiration => "expiration",
            Self::TrialStart => "trial_start",
            Self::TrialConversion => "trial_conversion",
            Self::Upgrade => "upgrade",
            Self::Downgrade => "downgrade",
            Self::Crossgrade => "crossgrade",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Revoke => "revoke",
            Self::OfferRedeemed => "offer_redeemed",
            Self::PriceChange => "price_change",
        }
    }

    /// Event types that represent a successful payment
    pub fn is_payment(&self) -> bool {
        matches!(self, Self::Purchase | Self::Renewal | Self::TrialConversion)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(Self::Purchase),
            "renewal" => Ok(Self::Renewal),
            "cancellation" => Ok(Self::Cancellation),
            "refund" => Ok(Self::Refund),
            "chargeback" => Ok(Self::Chargeback),
            "grace_period_start" => Ok(Self::GracePeriodStart),
            "grace_period_end" => Ok(Self::GracePeriodEnd),
            "billing_retry" => Ok(Self::BillingRetry),
            "expiration" => Ok(Self::Expiration),
            "trial_start" => Ok(Self::TrialStart),
            "trial_conversion" => Ok(Self::TrialConversion),
            "upgrade" => Ok(Self::Upgrade),
            "downgrade" => Ok(Self::Downgrade),
            "crossgrade" => Ok(Self::Crossgrade),
            "pause" => Ok(Self::Pause),
            "resume" => Ok(Self::Resume),
            "revoke" => Ok(Self::Revoke),
            "offer_redeemed" => Ok(Self::OfferRedeemed),
            "price_change" => Ok(Self::PriceChange),
            other => Err(UnknownVariant::new("event type", other)),
        }
    }
}

/// Outcome status of the underlying billing operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Success,
    Failed,
    Pending,
    Refunded,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Pending => "pending",
            Self::Refunded => "refunded",
        }
    }
}

impl FromStr for EventStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "pending" => Ok(Self::Pending),
            "refunded" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("event status", other)),
        }
    }
}

/// Billing period granularity carried on subscription events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Trial,
    Intro,
    Normal,
}

impl PeriodType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Intro => "intro",
            Self::Normal => "normal",
        }
    }
}

/// A provider-typed external identifier used to resolve the canonical user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityHint {
    pub source: BillingSource,
    pub id_type: IdType,
    pub external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl IdentityHint {
    pub fn new(source: BillingSource, id_type: IdType, external_id: impl Into<String>) -> Self {
        Self {
            source,
            id_type,
            external_id: external_id.into(),
            metadata: None,
        }
    }
}

/// Provider-independent event emitted by a normalizer, not yet persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub source: BillingSource,
    pub event_type: EventType,
    /// Native wire-format type string, retained verbatim for audit
    pub source_event_type: String,
    pub status: EventStatus,
    pub event_time: DateTime<Utc>,
    /// Globally-unique dedupe key, `<source>:<external id>` shaped
    pub idempotency_key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_cents: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proceeds_cents: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_subscription_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_product_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_type: Option<PeriodType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_period_expiration: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_interval: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub environment: ProviderEnvironment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,

    pub raw_payload: Value,
    #[serde(default)]
    pub identity_hints: Vec<IdentityHint>,
}

impl NormalizedEvent {
    /// Minimal constructor; optional fields are filled in by the normalizer
    pub fn new(
        source: BillingSource,
        event_type: EventType,
        source_event_type: impl Into<String>,
        event_time: DateTime<Utc>,
        idempotency_key: impl Into<String>,
        raw_payload: Value,
    ) -> Self {
        Self {
            source,
            event_type,
            source_event_type: source_event_type.into(),
            status: EventStatus::Success,
            event_time,
            idempotency_key: idempotency_key.into(),
            amount_cents: None,
            currency: None,
            proceeds_cents: None,
            external_event_id: None,
            external_subscription_id: None,
            original_transaction_id: None,
            subscription_group_id: None,
            external_product_id: None,
            period_type: None,
            period_start: None,
            period_end: None,
            expiration_time: None,
            grace_period_expiration: None,
            cancellation_reason: None,
            billing_interval: None,
            plan_tier: None,
            trial_started_at: None,
            environment: ProviderEnvironment::Production,
            country_code: None,
            raw_payload,
            identity_hints: Vec::new(),
        }
    }
}

/// How a canonical event reached the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngestSource {
    #[default]
    Webhook,
    Backfill,
}

impl IngestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Backfill => "backfill",
        }
    }
}

impl FromStr for IngestSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "webhook" => Ok(Self::Webhook),
            "backfill" => Ok(Self::Backfill),
            other => Err(UnknownVariant::new("ingest source", other)),
        }
    }
}

/// Persisted, append-only, idempotent record of a billing event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub source: BillingSource,
    pub event_type: EventType,
    pub source_event_type: String,
    pub status: EventStatus,
    pub event_time: DateTime<Utc>,
    pub idempotency_key: String,
    pub ingest_source: IngestSource,

    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub proceeds_cents: Option<i64>,

    pub external_event_id: Option<String>,
    pub external_subscription_id: Option<String>,
    pub original_transaction_id: Option<String>,
    pub subscription_group_id: Option<String>,

    pub period_type: Option<String>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub expiration_time: Option<DateTime<Utc>>,
    pub grace_period_expiration: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub billing_interval: Option<String>,
    pub plan_tier: Option<String>,
    pub trial_started_at: Option<DateTime<Utc>>,
    pub environment: ProviderEnvironment,
    pub country_code: Option<String>,

    /// Raw provider payload; nulled by retention after two years
    pub raw_payload: Option<Value>,
    pub ingested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_vocabulary_is_closed_and_round_trips() {
        let all = [
            "purchase",
            "renewal",
            "cancellation",
            "refund",
            "chargeback",
            "grace_period_start",
            "grace_period_end",
            "billing_retry",
            "expiration",
            "trial_start",
            "trial_conversion",
            "upgrade",
            "downgrade",
            "crossgrade",
            "pause",
            "resume",
            "revoke",
            "offer_redeemed",
            "price_change",
        ];
        for name in all {
            let parsed: EventType = name.parse().unwrap();
            assert_eq!(parsed.as_str(), name);
        }
        assert!("invoice.paid".parse::<EventType>().is_err());
    }

    #[test]
    fn payment_event_classification() {
        assert!(EventType::Purchase.is_payment());
        assert!(EventType::Renewal.is_payment());
        assert!(EventType::TrialConversion.is_payment());
        assert!(!EventType::Refund.is_payment());
        assert!(!EventType::Cancellation.is_payment());
    }

    #[test]
    fn normalized_event_serializes_without_empty_options() {
        let event = NormalizedEvent::new(
            BillingSource::Stripe,
            EventType::Purchase,
            "customer.subscription.created",
            Utc::now(),
            "stripe:evt_1",
            serde_json::json!({}),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("amount_cents").is_none());
        assert_eq!(json["event_type"], "purchase");
    }
}
