//! A refund was issued but access was never revoked
//!
//! Grace window: one hour. The scheduled scan is the primary path; the
//! event-triggered check only fires for late-arriving refunds (backfill)
//! whose grace window has already elapsed.

use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use revback_database::Repositories;
use revback_shared::{
    CanonicalEvent, DetectedIssue, DetectionTier, EntitlementState, EventType, IssueSeverity,
};
use serde_json::json;
use uuid::Uuid;

const CONFIDENCE: f64 = 0.92;
const GRACE_HOURS: i64 = 1;
const SCAN_BATCH: i64 = 500;

pub struct RefundNotRevokedDetector;

impl RefundNotRevokedDetector {
    async fn evaluate_refund(
        &self,
        repos: &Repositories,
        org_id: Uuid,
        refund: &CanonicalEvent,
    ) -> DetectionResult<Option<DetectedIssue>> {
        let (Some(user_id), Some(product_id)) = (refund.user_id, refund.product_id) else {
            return Ok(None);
        };
        let Some(entitlement) = repos
            .entitlements
            .find(org_id, user_id, product_id, refund.source)
            .await?
        else {
            return Ok(None);
        };

        let revoked_states = [
            EntitlementState::Refunded,
            EntitlementState::Revoked,
            EntitlementState::Expired,
        ];
        if revoked_states.contains(&entitlement.state) {
            return Ok(None);
        }

        Ok(Some(DetectedIssue {
            issue_type: self.id().to_string(),
            severity: IssueSeverity::Warning,
            title: "Refund issued but access not revoked".to_string(),
            description: format!(
                "A {} refund from {} is more than an hour old but the entitlement is still {}.",
                refund.source, refund.event_time, entitlement.state
            ),
            user_id: Some(user_id),
            estimated_revenue_cents: refund.amount_cents,
            confidence: CONFIDENCE,
            evidence: json!({
                "refund_event_id": refund.id,
                "refund_time": refund.event_time,
                "entitlement_id": entitlement.id,
                "entitlement_state": entitlement.state,
                "source": refund.source,
            }),
            detection_tier: DetectionTier::BillingOnly,
        }))
    }
}

#[async_trait]
impl Detector for RefundNotRevokedDetector {
    fn id(&self) -> &'static str {
        "refund_not_revoked"
    }

    fn name(&self) -> &'static str {
        "Refund not revoked"
    }

    fn description(&self) -> &'static str {
        "A refund event exists but the entitlement still grants access more than an hour later"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("*/30 * * * *")
    }

    async fn check_event(
        &self,
        repos: &Repositories,
        org_id: Uuid,
        event: &CanonicalEvent,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        if event.event_type != EventType::Refund {
            return Ok(Vec::new());
        }
        // live refunds get their hour of grace; only late arrivals check now
        if event.event_time > Utc::now() - Duration::hours(GRACE_HOURS) {
            return Ok(Vec::new());
        }
        Ok(self
            .evaluate_refund(repos, org_id, event)
            .await?
            .into_iter()
            .collect())
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let cutoff = Utc::now() - Duration::hours(GRACE_HOURS);
        let refunds = repos.events.refunds_before(org_id, cutoff, SCAN_BATCH).await?;
        let mut issues = Vec::new();
        for refund in &refunds {
            if let Some(issue) = self.evaluate_refund(repos, org_id, refund).await? {
                issues.push(issue);
            }
        }
        Ok(issues)
    }
}
