//! Applies canonical events to stored entitlements
//!
//! One event produces at most one transition. The persist is an
//! optimistic-lock update; on a stale read the engine logs and returns
//! `None` rather than retrying — the queue's redelivery re-reads and
//! re-evaluates.

use crate::machine::transition_for;
use revback_database::repositories::EntitlementUpdate;
use revback_database::{DatabaseError, Repositories};
use revback_shared::{
    CanonicalEvent, Entitlement, EventStatus, EventType, StateTransition,
};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors surfaced to the ingestion pipeline
#[derive(Error, Debug)]
pub enum EntitlementEngineError {
    #[error("storage error: {source}")]
    Database {
        #[from]
        source: DatabaseError,
    },
}

/// The entitlement engine
#[derive(Clone)]
pub struct EntitlementEngine {
    repos: Repositories,
}

impl EntitlementEngine {
    pub fn new(repos: Repositories) -> Self {
        Self { repos }
    }

    /// Apply one stored canonical event. Returns the updated entitlement
    /// when a transition was applied, `None` otherwise.
    pub async fn apply(
        &self,
        event: &CanonicalEvent,
    ) -> Result<Option<Entitlement>, EntitlementEngineError> {
        let (Some(user_id), Some(product_id)) = (event.user_id, event.product_id) else {
            return Ok(None);
        };

        let entitlement = self
            .repos
            .entitlements
            .ensure_exists(event.org_id, user_id, product_id, event.source)
            .await?;

        let Some(transition) = transition_for(entitlement.state, event.event_type) else {
            if event.status == EventStatus::Failed {
                // failed attempts legitimately repeat in states with no cell
                return Ok(None);
            }
            warn!(
                org_id = %event.org_id,
                entitlement_id = %entitlement.id,
                state = %entitlement.state,
                event_type = %event.event_type,
                event_id = %event.id,
                "event has no transition from current state"
            );
            return Ok(None);
        };

        let new_state = transition.target(entitlement.state);
        let record = StateTransition {
            from: entitlement.state,
            to: new_state,
            event_type: event.event_type,
            event_id: event.id,
            timestamp: event.event_time,
        };

        let update = build_update(event);
        let applied = self
            .repos
            .entitlements
            .apply_transition(&entitlement, entitlement.state, new_state, &record, &update)
            .await?;

        if !applied {
            warn!(
                org_id = %event.org_id,
                entitlement_id = %entitlement.id,
                event_id = %event.id,
                "optimistic lock lost, leaving to queue redelivery"
            );
            return Ok(None);
        }

        debug!(
            org_id = %event.org_id,
            entitlement_id = %entitlement.id,
            from = %record.from,
            to = %record.to,
            event_type = %event.event_type,
            "entitlement transition applied"
        );

        let updated = self
            .repos
            .entitlements
            .find_by_id(event.org_id, entitlement.id)
            .await?;
        Ok(updated)
    }
}

/// Derive the field updates a transition carries from event metadata.
/// Interval and tier overwrite only when present (COALESCE in the update).
fn build_update(event: &CanonicalEvent) -> EntitlementUpdate {
    let trial_end = match event.event_type {
        EventType::TrialStart => event.period_end.or(event.expiration_time),
        _ => None,
    };
    let cancel_at = match event.event_type {
        EventType::Cancellation => event.expiration_time.or(event.period_end),
        _ => None,
    };
    EntitlementUpdate {
        external_subscription_id: event.external_subscription_id.clone(),
        current_period_start: event.period_start,
        current_period_end: event.period_end.or(event.expiration_time),
        cancel_at,
        trial_end,
        billing_interval: event.billing_interval.clone(),
        plan_tier: event.plan_tier.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use revback_shared::{BillingSource, IngestSource, ProviderEnvironment};
    use uuid::Uuid;

    fn event(event_type: EventType) -> CanonicalEvent {
        let now = Utc::now();
        CanonicalEvent {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            user_id: Some(Uuid::new_v4()),
            product_id: Some(Uuid::new_v4()),
            source: BillingSource::Stripe,
            event_type,
            source_event_type: "test".into(),
            status: EventStatus::Success,
            event_time: now,
            idempotency_key: format!("stripe:{}", Uuid::new_v4()),
            ingest_source: IngestSource::Webhook,
            amount_cents: Some(999),
            currency: Some("USD".into()),
            proceeds_cents: None,
            external_event_id: None,
            external_subscription_id: Some("sub_1".into()),
            original_transaction_id: None,
            subscription_group_id: None,
            period_type: None,
            period_start: Some(now),
            period_end: Some(now + Duration::days(30)),
            expiration_time: None,
            grace_period_expiration: None,
            cancellation_reason: None,
            billing_interval: Some("month".into()),
            plan_tier: Some("Pro".into()),
            trial_started_at: None,
            environment: ProviderEnvironment::Production,
            country_code: None,
            raw_payload: None,
            ingested_at: now,
            processed_at: None,
        }
    }

    #[test]
    fn update_carries_period_bounds_and_plan_metadata() {
        let e = event(EventType::Purchase);
        let update = build_update(&e);
        assert_eq!(update.current_period_start, e.period_start);
        assert_eq!(update.current_period_end, e.period_end);
        assert_eq!(update.billing_interval.as_deref(), Some("month"));
        assert_eq!(update.plan_tier.as_deref(), Some("Pro"));
        assert_eq!(update.trial_end, None);
        assert_eq!(update.cancel_at, None);
    }

    #[test]
    fn trial_start_sets_trial_end_from_period() {
        let e = event(EventType::TrialStart);
        let update = build_update(&e);
        assert_eq!(update.trial_end, e.period_end);
    }

    #[test]
    fn cancellation_sets_cancel_at() {
        let mut e = event(EventType::Cancellation);
        e.expiration_time = Some(e.event_time + Duration::days(12));
        let update = build_update(&e);
        assert_eq!(update.cancel_at, e.expiration_time);
    }

    #[test]
    fn expiration_time_backfills_period_end() {
        let mut e = event(EventType::Renewal);
        e.period_end = None;
        e.expiration_time = Some(e.event_time + Duration::days(30));
        let update = build_update(&e);
        assert_eq!(update.current_period_end, e.expiration_time);
    }
}
