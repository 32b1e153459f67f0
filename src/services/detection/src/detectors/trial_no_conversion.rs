//! Trial ended without converting
//!
//! Severity steps from info to warning at twelve hours past trial end.
//! Confidence grows with elapsed time: `0.6 + 0.02 per hour`, clamped at
//! `0.90`.

use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revback_database::Repositories;
use revback_shared::{DetectedIssue, DetectionTier, IssueSeverity};
use serde_json::json;
use uuid::Uuid;

const WARNING_AFTER_HOURS: i64 = 12;

/// Confidence curve: 0.6 at trial end, clamped at 0.90
fn confidence_for(hours_since_trial_end: i64) -> f64 {
    (0.6 + 0.02 * hours_since_trial_end as f64).min(0.90)
}

fn severity_for(hours_since_trial_end: i64) -> IssueSeverity {
    if hours_since_trial_end >= WARNING_AFTER_HOURS {
        IssueSeverity::Warning
    } else {
        IssueSeverity::Info
    }
}

pub struct TrialNoConversionDetector;

#[async_trait]
impl Detector for TrialNoConversionDetector {
    fn id(&self) -> &'static str {
        "trial_no_conversion"
    }

    fn name(&self) -> &'static str {
        "Trial did not convert"
    }

    fn description(&self) -> &'static str {
        "A trial ended and the entitlement never reached the active state"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("0 * * * *")
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let now = Utc::now();
        let unconverted = repos
            .entitlements
            .trials_ended_unconverted(org_id, now)
            .await?;

        let mut issues = Vec::new();
        for entitlement in &unconverted {
            let trial_end: DateTime<Utc> = entitlement
                .trial_end
                .expect("query guarantees a trial end");
            let hours = (now - trial_end).num_hours();

            issues.push(DetectedIssue {
                issue_type: self.id().to_string(),
                severity: severity_for(hours),
                title: "Trial ended without conversion".to_string(),
                description: format!(
                    "The trial on {} ended {} hours ago and the entitlement is {}.",
                    entitlement.source, hours, entitlement.state
                ),
                user_id: Some(entitlement.user_id),
                estimated_revenue_cents: None,
                confidence: confidence_for(hours),
                evidence: json!({
                    "entitlement_id": entitlement.id,
                    "trial_end": trial_end,
                    "hours_since_trial_end": hours,
                    "state": entitlement.state,
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

    #[test]
    fn confidence_starts_at_point_six_and_clamps_at_point_nine() {
        assert_eq!(confidence_for(0), 0.6);
        assert!((confidence_for(10) - 0.8).abs() < 1e-9);
        // 0.6 + 0.02 * 20 = 1.0, clamped
        assert_eq!(confidence_for(20), 0.90);
        assert_eq!(confidence_for(500), 0.90);
    }

    #[test]
    fn severity_steps_to_warning_at_twelve_hours() {
        assert_eq!(severity_for(0), IssueSeverity::Info);
        assert_eq!(severity_for(11), IssueSeverity::Info);
        assert_eq!(severity_for(12), IssueSeverity::Warning);
        assert_eq!(severity_for(48), IssueSeverity::Warning);
    }
}
