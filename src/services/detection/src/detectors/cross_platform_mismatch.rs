//! Entitlement states disagree across billing platforms
//!
//! For users with identities in two or more sources: one source shows a
//! live, paying entitlement while another shows it ended. Confidence rises
//! when the denying side is a hard stop (refunded or revoked).

use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use revback_database::Repositories;
use revback_shared::{
    DetectedIssue, DetectionTier, Entitlement, EntitlementState, IssueSeverity,
};
use serde_json::json;
use uuid::Uuid;

const BASE_CONFIDENCE: f64 = 0.80;
const HARD_STOP_CONFIDENCE: f64 = 0.95;

fn is_live(state: EntitlementState) -> bool {
    state.grants_access()
}

fn is_ended(state: EntitlementState) -> bool {
    matches!(
        state,
        EntitlementState::Expired | EntitlementState::Revoked | EntitlementState::Refunded
    )
}

/// A (live, ended) pair across different sources, if one exists
fn find_conflict(entitlements: &[Entitlement]) -> Option<(&Entitlement, &Entitlement)> {
    let live = entitlements.iter().find(|e| is_live(e.state))?;
    let ended = entitlements
        .iter()
        .find(|e| e.source != live.source && is_ended(e.state))?;
    Some((live, ended))
}

pub struct CrossPlatformMismatchDetector;

#[async_trait]
impl Detector for CrossPlatformMismatchDetector {
    fn id(&self) -> &'static str {
        "cross_platform_mismatch"
    }

    fn name(&self) -> &'static str {
        "Cross-platform mismatch"
    }

    fn description(&self) -> &'static str {
        "A user's entitlement states disagree across billing platforms in a revenue-relevant way"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("0 */4 * * *")
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let user_ids = repos.users.multi_source_user_ids(org_id).await?;
        let mut issues = Vec::new();

        for user_id in user_ids {
            let entitlements = repos.entitlements.list_for_user(org_id, user_id).await?;
            let Some((live, ended)) = find_conflict(&entitlements) else {
                continue;
            };

            let hard_stop = matches!(
                ended.state,
                EntitlementState::Refunded | EntitlementState::Revoked
            );
            let confidence = if hard_stop {
                HARD_STOP_CONFIDENCE
            } else {
                BASE_CONFIDENCE
            };

            let last_payment = repos
                .events
                .last_payment(org_id, user_id, live.product_id)
                .await?;

            issues.push(DetectedIssue {
                issue_type: self.id().to_string(),
                severity: IssueSeverity::Warning,
                title: "Entitlement state differs across platforms".to_string(),
                description: format!(
                    "User is {} on {} but {} on {}; one platform may be billing for access the other ended.",
                    live.state, live.source, ended.state, ended.source
                ),
                user_id: Some(user_id),
                estimated_revenue_cents: last_payment.and_then(|e| e.amount_cents),
                confidence,
                evidence: json!({
                    "live_source": live.source,
                    "live_state": live.state,
                    "live_entitlement_id": live.id,
                    "ended_source": ended.source,
                    "ended_state": ended.state,
                    "ended_entitlement_id": ended.id,
                }),
                detection_tier: DetectionTier::BillingOnly,
            });
        }
        Ok(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::test_support::entitlement;
    use revback_shared::BillingSource;

    #[test]
    fn conflict_requires_distinct_sources() {
        let mut live = entitlement(EntitlementState::Active);
        live.source = BillingSource::Stripe;
        let mut ended = entitlement(EntitlementState::Expired);
        ended.source = BillingSource::Apple;
        assert!(find_conflict(&[live.clone(), ended.clone()]).is_some());

        // same source: not a cross-platform conflict
        ended.source = BillingSource::Stripe;
        assert!(find_conflict(&[live, ended]).is_none());
    }

    #[test]
    fn two_live_entitlements_are_fine() {
        let mut a = entitlement(EntitlementState::Active);
        a.source = BillingSource::Stripe;
        let mut b = entitlement(EntitlementState::Trial);
        b.source = BillingSource::Google;
        assert!(find_conflict(&[a, b]).is_none());
    }
}
