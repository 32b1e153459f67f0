//! Active entitlement with no payment backing it
//!
//! An entitlement is `active` but no successful payment event exists inside
//! the current billing period plus a 14-day posting allowance. Period
//! length derives from the entitlement's billing interval.

use super::monthly_equivalent_cents;
use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use revback_database::Repositories;
use revback_shared::{
    DetectedIssue, DetectionTier, Entitlement, EntitlementState, IssueSeverity,
};
use serde_json::json;
use uuid::Uuid;

const CONFIDENCE: f64 = 0.85;
const SCAN_BATCH: i64 = 500;
const POSTING_ALLOWANCE_DAYS: i64 = 14;

/// Billing period length in months for lookback purposes
fn period_months(entitlement: &Entitlement) -> i64 {
    match entitlement.billing_interval.as_deref() {
        Some("year") | Some("annual") => 12,
        Some("week") => 1,
        _ => 1,
    }
}

pub struct EntitlementWithoutPaymentDetector;

#[async_trait]
impl Detector for EntitlementWithoutPaymentDetector {
    fn id(&self) -> &'static str {
        "entitlement_without_payment"
    }

    fn name(&self) -> &'static str {
        "Entitlement without payment"
    }

    fn description(&self) -> &'static str {
        "An entitlement grants access but no successful payment covers the current period"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("0 */6 * * *")
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let actives = repos
            .entitlements
            .list_by_state(org_id, EntitlementState::Active, SCAN_BATCH)
            .await?;

        let mut issues = Vec::new();
        for entitlement in &actives {
            let lookback = Duration::days(period_months(entitlement) * 30 + POSTING_ALLOWANCE_DAYS);
            let since = Utc::now() - lookback;
            if repos
                .events
                .has_payment_since(org_id, entitlement.user_id, entitlement.product_id, since)
                .await?
            {
                continue;
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
                title: "Active entitlement without a covering payment".to_string(),
                description: format!(
                    "Entitlement is active on {} but no successful payment was seen in the last {} days.",
                    entitlement.source,
                    lookback.num_days()
                ),
                user_id: Some(entitlement.user_id),
                estimated_revenue_cents: monthly,
                confidence: CONFIDENCE,
                evidence: json!({
                    "entitlement_id": entitlement.id,
                    "source": entitlement.source,
                    "billing_interval": entitlement.billing_interval,
                    "lookback_days": lookback.num_days(),
                    "last_payment_event_id": last_payment.as_ref().map(|e| e.id),
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

    #[test]
    fn period_months_maps_intervals() {
        let mut e = entitlement(EntitlementState::Active);
        e.billing_interval = Some("month".into());
        assert_eq!(period_months(&e), 1);
        e.billing_interval = Some("year".into());
        assert_eq!(period_months(&e), 12);
        e.billing_interval = None;
        assert_eq!(period_months(&e), 1);
    }
}
