//! Core identifiers shared by every service
//!
//! Billing sources, identity hint types and the fixed set of durable queue
//! names. String representations are stable: they are stored in Postgres
//! columns and used as Redis key fragments, so renaming a variant is a data
//! migration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Billing provider a connection or event originates from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingSource {
    Stripe,
    Apple,
    Google,
    Recurly,
    Braintree,
}

impl BillingSource {
    /// Stable string form used in database columns and Redis keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Apple => "apple",
            Self::Google => "google",
            Self::Recurly => "recurly",
            Self::Braintree => "braintree",
        }
    }

    /// Sources that accept inbound webhooks
    pub fn webhook_sources() -> &'static [BillingSource] {
        &[Self::Stripe, Self::Apple, Self::Google, Self::Recurly]
    }
}

impl fmt::Display for BillingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(Self::Stripe),
            "apple" => Ok(Self::Apple),
            "google" => Ok(Self::Google),
            "recurly" => Ok(Self::Recurly),
            "braintree" => Ok(Self::Braintree),
            other => Err(UnknownVariant::new("billing source", other)),
        }
    }
}

/// Provider environment an event was produced in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderEnvironment {
    Sandbox,
    #[default]
    Production,
}

impl ProviderEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sandbox => "sandbox",
            Self::Production => "production",
        }
    }
}

impl FromStr for ProviderEnvironment {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sandbox" => Ok(Self::Sandbox),
            "production" => Ok(Self::Production),
            other => Err(UnknownVariant::new("environment", other)),
        }
    }
}

/// Kind of provider-issued identifier carried by an identity hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdType {
    CustomerId,
    OriginalTransactionId,
    PurchaseToken,
    LinkedPurchaseToken,
    AppUserId,
    Email,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerId => "customer_id",
            Self::OriginalTransactionId => "original_transaction_id",
            Self::PurchaseToken => "purchase_token",
            Self::LinkedPurchaseToken => "linked_purchase_token",
            Self::AppUserId => "app_user_id",
            Self::Email => "email",
        }
    }
}

impl FromStr for IdType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "customer_id" => Ok(Self::CustomerId),
            "original_transaction_id" => Ok(Self::OriginalTransactionId),
            "purchase_token" => Ok(Self::PurchaseToken),
            "linked_purchase_token" => Ok(Self::LinkedPurchaseToken),
            "app_user_id" => Ok(Self::AppUserId),
            "email" => Ok(Self::Email),
            other => Err(UnknownVariant::new("id type", other)),
        }
    }
}

/// Error returned when parsing a stored enum string fails
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}

/// Durable queue names. Every producer and worker refers to these constants.
pub mod queues {
    pub const WEBHOOK_PROCESSING: &str = "webhook-processing";
    pub const ALERT_DISPATCH: &str = "alert-dispatch";
    pub const WEBHOOK_DELIVERY: &str = "webhook-delivery";
    pub const SCHEDULED_SCANS: &str = "scheduled-scans";
    pub const DATA_RETENTION: &str = "data-retention";
    pub const INGESTION_BACKFILL: &str = "ingestion-backfill";

    /// All queue names, in the order the admin endpoint reports them
    pub const ALL: &[&str] = &[
        WEBHOOK_PROCESSING,
        ALERT_DISPATCH,
        WEBHOOK_DELIVERY,
        SCHEDULED_SCANS,
        DATA_RETENTION,
        INGESTION_BACKFILL,
    ];
}

/// API token scopes enforced by the gateway
pub mod scopes {
    pub const ISSUES_READ: &str = "issues:read";
    pub const ISSUES_WRITE: &str = "issues:write";
    pub const USERS_READ: &str = "users:read";
    pub const EVENTS_READ: &str = "events:read";
    pub const ALERTS_READ: &str = "alerts:read";
    pub const ALERTS_WRITE: &str = "alerts:write";
    pub const ADMIN_READ: &str = "admin:read";
    pub const ADMIN_WRITE: &str = "admin:write";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_source_round_trips_through_strings() {
        for source in [
            BillingSource::Stripe,
            BillingSource::Apple,
            BillingSource::Google,
            BillingSource::Recurly,
            BillingSource::Braintree,
        ] {
            assert_eq!(source.as_str().parse::<BillingSource>().unwrap(), source);
        }
    }

    #[test]
    fn unknown_source_is_rejected() {
        let err = "paddle".parse::<BillingSource>().unwrap_err();
        assert_eq!(err.value, "paddle");
    }

    #[test]
    fn webhook_sources_exclude_braintree() {
        assert!(!BillingSource::webhook_sources().contains(&BillingSource::Braintree));
    }
}
