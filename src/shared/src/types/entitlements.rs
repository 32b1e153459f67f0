//! Entitlement state and transition history types
//!
//! The entitlement row is the authoritative access record per
//! (org, user, product, source). State changes are produced exclusively by
//! the entitlement engine; the history list is append-only.

use super::core::{BillingSource, UnknownVariant};
use super::events::EventType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Entitlement lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementState {
    #[default]
    Inactive,
    Trial,
    Active,
    GracePeriod,
    BillingRetry,
    PastDue,
    Paused,
    Expired,
    Revoked,
    Refunded,
}

impl EntitlementState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Trial => "trial",
            Self::Active => "active",
            Self::GracePeriod => "grace_period",
            Self::BillingRetry => "billing_retry",
            Self::PastDue => "past_due",
            Self::Paused => "paused",
            Self::Expired => "expired",
            Self::Revoked => "revoked",
            Self::Refunded => "refunded",
        }
    }

    /// Whether this state grants the end-user access.
    ///
    /// `paused` and `past_due` deny access by convention.
    pub fn grants_access(&self) -> bool {
        matches!(
            self,
            Self::Trial | Self::Active | Self::GracePeriod | Self::BillingRetry
        )
    }
}

impl fmt::Display for EntitlementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntitlementState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(Self::Inactive),
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "grace_period" => Ok(Self::GracePeriod),
            "billing_retry" => Ok(Self::BillingRetry),
            "past_due" => Ok(Self::PastDue),
            "paused" => Ok(Self::Paused),
            "expired" => Ok(Self::Expired),
            "revoked" => Ok(Self::Revoked),
            "refunded" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("entitlement state", other)),
        }
    }
}

/// One applied transition, appended to the entitlement's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: EntitlementState,
    pub to: EntitlementState,
    pub event_type: EventType,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

/// Authoritative access record per (org, user, product, source)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub source: BillingSource,
    pub state: EntitlementState,
    pub external_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub billing_interval: Option<String>,
    pub plan_tier: Option<String>,
    pub last_event_id: Option<Uuid>,
    /// Append-only; stored as a JSONB array
    pub state_history: Vec<StateTransition>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    /// Access predicate for the current state
    pub fn has_access(&self) -> bool {
        self.state.grants_access()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_is_granted_only_in_the_four_live_states() {
        let granting = [
            EntitlementState::Trial,
            EntitlementState::Active,
            EntitlementState::GracePeriod,
            EntitlementState::BillingRetry,
        ];
        let denying = [
            EntitlementState::Inactive,
            EntitlementState::PastDue,
            EntitlementState::Paused,
            EntitlementState::Expired,
            EntitlementState::Revoked,
            EntitlementState::Refunded,
        ];
        for state in granting {
            assert!(state.grants_access(), "{state} should grant access");
        }
        for state in denying {
            assert!(!state.grants_access(), "{state} should deny access");
        }
    }

    #[test]
    fn state_round_trips_through_strings() {
        for state in [
            EntitlementState::Inactive,
            EntitlementState::Trial,
            EntitlementState::Active,
            EntitlementState::GracePeriod,
            EntitlementState::BillingRetry,
            EntitlementState::PastDue,
            EntitlementState::Paused,
            EntitlementState::Expired,
            EntitlementState::Revoked,
            EntitlementState::Refunded,
        ] {
            assert_eq!(state.as_str().parse::<EntitlementState>().unwrap(), state);
        }
    }
}
