//! An active subscription's period lapsed with no explaining event
//!
//! The period ended one to five days ago and neither a renewal nor a
//! cancellation nor a refund has arrived for the subscription since. Either
//! the renewal silently failed or its webhook never made it here.

use super::monthly_equivalent_cents;
use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use revback_database::Repositories;
use revback_shared::{DetectedIssue, DetectionTier, EventType, IssueSeverity};
use serde_json::json;
use uuid::Uuid;

const CONFIDENCE: f64 = 0.85;

pub struct SilentRenewalFailureDetector;

#[async_trait]
impl Detector for SilentRenewalFailureDetector {
    fn id(&self) -> &'static str {
        "silent_renewal_failure"
    }

    fn name(&self) -> &'static str {
        "Silent renewal failure"
    }

    fn description(&self) -> &'static str {
        "An active entitlement's period lapsed recently with no renewal, cancellation or refund event"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("0 */2 * * *")
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let now = Utc::now();
        let lapsed = repos
            .entitlements
            .active_lapsed_between(org_id, now - Duration::days(5), now - Duration::days(1))
            .await?;

        let explaining = [
            EventType::Renewal,
            EventType::Cancellation,
            EventType::Refund,
        ];

        let mut issues = Vec::new();
        for entitlement in &lapsed {
            let period_end = entitlement
                .current_period_end
                .expect("query guarantees a period end");

            if let Some(subscription_id) = &entitlement.external_subscription_id {
                if repos
                    .events
                    .has_event_for_subscription_since(org_id, subscription_id, &explaining, period_end)
                    .await?
                {
                    continue;
                }
            }

            let last_payment = repos
                .events
                .last_payment(org_id, entitlement.user_id, entitlement.product_id)
                .await?;
            let monthly = monthly_equivalent_cents(
                entitlement,
                last_payment.as_ref().and_then(|e| e.amount_cents),
            );

            issues.push(DetectedIssue {
                issue_type: self.id().to_string(),
                severity: IssueSeverity::Warning,
                title: "Subscription lapsed without a renewal event".to_string(),
                description: format!(
                    "The {} period ended at {} and no renewal, cancellation or refund has been seen since.",
                    entitlement.source, period_end
                ),
                user_id: Some(entitlement.user_id),
                estimated_revenue_cents: monthly,
                confidence: CONFIDENCE,
                evidence: json!({
                    "entitlement_id": entitlement.id,
                    "current_period_end": period_end,
                    "external_subscription_id": entitlement.external_subscription_id,
                    "source": entitlement.source,
                }),
                detection_tier: DetectionTier::BillingOnly,
            });
        }
        Ok(issues)
    }
}
