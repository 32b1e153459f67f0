//! Provider webhooks stopped arriving
//!
//! Per-source thresholds (hours) for warning and critical, reflecting how
//! chatty each provider normally is. A connection older than a day that has
//! never received a webhook is critical outright.

use crate::registry::{DetectionResult, Detector};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revback_database::Repositories;
use revback_shared::{
    BillingConnection, BillingSource, DetectedIssue, DetectionTier, IssueSeverity,
};
use serde_json::json;
use uuid::Uuid;

const NEVER_RECEIVED_CONFIDENCE: f64 = 0.95;
const WARNING_CONFIDENCE: f64 = 0.80;
const CRITICAL_CONFIDENCE: f64 = 0.90;

/// (warning, critical) thresholds in hours since the last webhook
fn thresholds(source: BillingSource) -> Option<(i64, i64)> {
    match source {
        BillingSource::Stripe => Some((4, 12)),
        BillingSource::Apple => Some((12, 48)),
        BillingSource::Google => Some((6, 24)),
        BillingSource::Recurly => Some((4, 12)),
        BillingSource::Braintree => None,
    }
}

/// Evaluate one connection at `now`
fn evaluate(connection: &BillingConnection, now: DateTime<Utc>) -> Option<DetectedIssue> {
    if !connection.active {
        return None;
    }
    let (warning_h, critical_h) = thresholds(connection.source)?;

    let (severity, confidence, threshold, hours_since) = match connection.last_webhook_at {
        None => {
            let age_hours = (now - connection.created_at).num_hours();
            if age_hours < 24 {
                return None;
            }
            (IssueSeverity::Critical, NEVER_RECEIVED_CONFIDENCE, critical_h, age_hours)
        }
        Some(last) => {
            let hours = (now - last).num_hours();
            if hours >= critical_h {
                (IssueSeverity::Critical, CRITICAL_CONFIDENCE, critical_h, hours)
            } else if hours >= warning_h {
                (IssueSeverity::Warning, WARNING_CONFIDENCE, warning_h, hours)
            } else {
                return None;
            }
        }
    };

    Some(DetectedIssue {
        issue_type: "webhook_delivery_gap".to_string(),
        severity,
        title: format!("{} webhooks have stopped arriving", connection.source),
        description: match connection.last_webhook_at {
            Some(last) => format!(
                "No {} webhook for {} hours (last at {}); events may be silently dropping.",
                connection.source, hours_since, last
            ),
            None => format!(
                "The {} connection is {} hours old and has never received a webhook.",
                connection.source, hours_since
            ),
        },
        user_id: None,
        estimated_revenue_cents: None,
        confidence,
        evidence: json!({
            "source": connection.source,
            "threshold": threshold,
            "hours_since_last": hours_since,
            "last_webhook_at": connection.last_webhook_at,
            "connection_id": connection.id,
        }),
        detection_tier: DetectionTier::BillingOnly,
    })
}

pub struct WebhookDeliveryGapDetector;

#[async_trait]
impl Detector for WebhookDeliveryGapDetector {
    fn id(&self) -> &'static str {
        "webhook_delivery_gap"
    }

    fn name(&self) -> &'static str {
        "Webhook delivery gap"
    }

    fn description(&self) -> &'static str {
        "A billing connection has gone silent longer than its source's expected cadence"
    }

    fn scan_cron(&self) -> Option<&'static str> {
        Some("*/30 * * * *")
    }

    async fn scheduled_scan(
        &self,
        repos: &Repositories,
        org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        let now = Utc::now();
        let connections = repos.connections.list_for_org(org_id).await?;
        Ok(connections
            .iter()
            .filter_map(|c| evaluate(c, now))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use revback_shared::SyncStatus;

    fn connection(source: BillingSource, last_webhook_hours_ago: Option<i64>, age_hours: i64) -> BillingConnection {
        let now = Utc::now();
        BillingConnection {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            source,
            credentials: "v1|a|b|c".into(),
            webhook_secret: None,
            active: true,
            last_webhook_at: last_webhook_hours_ago.map(|h| now - Duration::hours(h)),
            last_sync_at: None,
            sync_status: SyncStatus::Completed,
            original_notification_url: None,
            created_at: now - Duration::hours(age_hours),
            updated_at: now,
        }
    }

    #[test]
    fn apple_gap_crosses_warning_then_critical_at_boundaries() {
        let now = Utc::now();
        // 11h: below the 12h warning threshold
        assert!(evaluate(&connection(BillingSource::Apple, Some(11), 100), now).is_none());
        // 15h: warning, evidence records the crossed threshold
        let warning = evaluate(&connection(BillingSource::Apple, Some(15), 100), now).unwrap();
        assert_eq!(warning.severity, IssueSeverity::Warning);
        assert_eq!(warning.evidence["threshold"], 12);
        assert_eq!(warning.evidence["source"], "apple");
        // 48h: critical
        let critical = evaluate(&connection(BillingSource::Apple, Some(48), 100), now).unwrap();
        assert_eq!(critical.severity, IssueSeverity::Critical);
        assert_eq!(critical.evidence["threshold"], 48);
    }

    #[test]
    fn stripe_and_recurly_share_tighter_thresholds() {
        let now = Utc::now();
        for source in [BillingSource::Stripe, BillingSource::Recurly] {
            assert!(evaluate(&connection(source, Some(3), 100), now).is_none());
            let warning = evaluate(&connection(source, Some(5), 100), now).unwrap();
            assert_eq!(warning.severity, IssueSeverity::Warning);
            let critical = evaluate(&connection(source, Some(13), 100), now).unwrap();
            assert_eq!(critical.severity, IssueSeverity::Critical);
        }
    }

    #[test]
    fn never_received_is_critical_after_a_day() {
        let now = Utc::now();
        // young connection: give onboarding time
        assert!(evaluate(&connection(BillingSource::Google, None, 12), now).is_none());
        let issue = evaluate(&connection(BillingSource::Google, None, 30), now).unwrap();
        assert_eq!(issue.severity, IssueSeverity::Critical);
        assert_eq!(issue.confidence, 0.95);
    }

    #[test]
    fn inactive_connections_are_ignored() {
        let now = Utc::now();
        let mut c = connection(BillingSource::Stripe, Some(100), 200);
        c.active = false;
        assert!(evaluate(&c, now).is_none());
    }
}
