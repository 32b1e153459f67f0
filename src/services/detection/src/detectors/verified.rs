//! Tier-2 detectors backed by customer-app access reports
//!
//! These cross-check billing state against what the customer's app actually
//! observed, so their confidence is high and their findings are marked
//! `app_verified`. Both look at reports from the last 24 hours only.

use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use revback_database::Repositories;
use revback_shared::{DetectedIssue, DetectionTier, IssueSeverity};
use serde_json::json;
use uuid::Uuid;

const CONFIDENCE: f64 = 0.95;
const REPORT_WINDOW_HOURS: i64 = 24;

/// The app reports no access, yet billing shows an active entitlement
pub struct VerifiedPaidNoAccessDetector;

#[async_trait]
impl Detector for VerifiedPaidNoAccessDetector {
    fn id(&self) -> &'static str {
        "verified_paid_no_access"
    }

    fn name(&self) -> &'static str {
        "App-verified: paid but no access"
    }

    fn description(&self) -> &'static str {
        "The customer's app reported hasAccess=false for a user whose entitlement is active"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("*/15 * * * *")
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let since = Utc::now() - Duration::hours(REPORT_WINDOW_HOURS);
        let reports = repos.access_checks.latest_since(org_id, since).await?;

        let mut issues = Vec::new();
        for report in reports.iter().filter(|r| !r.has_access) {
            let entitlements = repos
                .entitlements
                .list_for_user(org_id, report.user_id)
                .await?;
            let Some(active) = entitlements
                .iter()
                .find(|e| e.state == revback_shared::EntitlementState::Active)
            else {
                continue;
            };

            let last_payment = repos
                .events
                .last_payment(org_id, report.user_id, active.product_id)
                .await?;

            issues.push(DetectedIssue {
                issue_type: self.id().to_string(),
                severity: IssueSeverity::Critical,
                title: "App confirms paying user is locked out".to_string(),
                description: format!(
                    "The app reported no access at {} but the {} entitlement is active.",
                    report.checked_at, active.source
                ),
                user_id: Some(report.user_id),
                estimated_revenue_cents: last_payment.and_then(|e| e.amount_cents),
                confidence: CONFIDENCE,
                evidence: json!({
                    "access_check_id": report.id,
                    "checked_at": report.checked_at,
                    "entitlement_id": active.id,
                    "entitlement_state": active.state,
                }),
                detection_tier: DetectionTier::AppVerified,
            });
        }
        Ok(issues)
    }
}

/// The app reports access, yet billing shows nothing backing it
pub struct VerifiedAccessNoPaymentDetector;

#[async_trait]
impl Detector for VerifiedAccessNoPaymentDetector {
    fn id(&self) -> &'static str {
        "verified_access_no_payment"
    }

    fn name(&self) -> &'static str {
        "App-verified: access without payment"
    }

    fn description(&self) -> &'static str {
        "The customer's app reported hasAccess=true for a user with no live entitlement"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("*/15 * * * *")
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let since = Utc::now() - Duration::hours(REPORT_WINDOW_HOURS);
        let reports = repos.access_checks.latest_since(org_id, since).await?;

        let mut issues = Vec::new();
        for report in reports.iter().filter(|r| r.has_access) {
            let entitlements = repos
                .entitlements
                .list_for_user(org_id, report.user_id)
                .await?;
            if entitlements.iter().any(|e| e.state.grants_access()) {
                continue;
            }

            issues.push(DetectedIssue {
                issue_type: self.id().to_string(),
                severity: IssueSeverity::Warning,
                title: "App grants access with no live entitlement".to_string(),
                description: format!(
                    "The app reported access at {} but no entitlement is in a granting state.",
                    report.checked_at
                ),
                user_id: Some(report.user_id),
                estimated_revenue_cents: None,
                confidence: CONFIDENCE,
                evidence: json!({
                    "access_check_id": report.id,
                    "checked_at": report.checked_at,
                    "entitlement_states": entitlements
                        .iter()
                        .map(|e| json!({"source": e.source, "state": e.state}))
                        .collect::<Vec<_>>(),
                }),
                detection_tier: DetectionTier::AppVerified,
            });
        }
        Ok(issues)
    }
}
