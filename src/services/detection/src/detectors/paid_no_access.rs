//! A successful payment landed on an entitlement that denies access
//!
//! Runs against the entitlement state as it was *before* the pipeline
//! applies the event's transition, so a payment that legitimately
//! re-activates an expired entitlement still surfaces the anomaly window.

use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use revback_database::Repositories;
use revback_shared::{
    CanonicalEvent, DetectedIssue, DetectionTier, EntitlementState, EventStatus, IssueSeverity,
};
use serde_json::json;
use uuid::Uuid;

const CONFIDENCE: f64 = 0.95;

pub struct PaidNoAccessDetector;

#[async_trait]
impl Detector for PaidNoAccessDetector {
    fn id(&self) -> &'static str {
        "paid_no_access"
    }

    fn name(&self) -> &'static str {
        "Paid but no access"
    }

    fn description(&self) -> &'static str {
        "A successful payment event arrived while the user's entitlement was in a state that denies access"
    }

    async fn check_event(
        &self,
        repos: &Repositories,
        org_id: Uuid,
        event: &CanonicalEvent,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        if !event.event_type.is_payment() || event.status != EventStatus::Success {
            return Ok(Vec::new());
        }
        let (Some(user_id), Some(product_id)) = (event.user_id, event.product_id) else {
            return Ok(Vec::new());
        };

        let Some(entitlement) = repos
            .entitlements
            .find(org_id, user_id, product_id, event.source)
            .await?
        else {
            return Ok(Vec::new());
        };

        let dead_states = [
            EntitlementState::Inactive,
            EntitlementState::Expired,
            EntitlementState::Revoked,
            EntitlementState::Refunded,
        ];
        if !dead_states.contains(&entitlement.state) {
            return Ok(Vec::new());
        }

        Ok(vec![DetectedIssue {
            issue_type: self.id().to_string(),
            severity: IssueSeverity::Critical,
            title: "Payment received for user without access".to_string(),
            description: format!(
                "A {} payment succeeded while the entitlement was {}; the user paid but was locked out.",
                event.source, entitlement.state
            ),
            user_id: Some(user_id),
            estimated_revenue_cents: event.amount_cents,
            confidence: CONFIDENCE,
            evidence: json!({
                "event_id": event.id,
                "entitlement_id": entitlement.id,
                "entitlement_state": entitlement.state,
                "source": event.source,
            }),
            detection_tier: DetectionTier::BillingOnly,
        }])
    }
}
