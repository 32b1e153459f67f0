//! Alert dispatcher
//!
//! For each new issue, reads the tenant's enabled alert configurations,
//! filters by severity and issue type, and dispatches per channel. Slack,
//! email and PagerDuty are posted synchronously from here; webhook
//! deliveries are handed to the webhook-delivery queue. Every attempt
//! lands in the delivery log, success or not.

use crate::error::{DeliveryError, DeliveryResult};
use crate::outbound::delivery_retry_schedule;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use once_cell::sync::OnceCell;
use revback_database::Repositories;
use revback_queue::{Job, Queue};
use revback_shared::{AlertChannel, AlertConfiguration, Issue, SmtpConfig};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Lazily-initialised process-wide SMTP transport; torn down with the
/// process on graceful shutdown.
static SMTP_TRANSPORT: OnceCell<AsyncSmtpTransport<Tokio1Executor>> = OnceCell::new();

fn smtp_transport(
    config: &SmtpConfig,
) -> DeliveryResult<&'static AsyncSmtpTransport<Tokio1Executor>> {
    SMTP_TRANSPORT.get_or_try_init(|| {
        AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
            .map_err(|e| DeliveryError::Email(e.to_string()))
            .map(|builder| {
                builder
                    .port(config.port)
                    .credentials(Credentials::new(
                        config.username.clone(),
                        config.password.clone(),
                    ))
                    .build()
            })
    })
}

/// Whether a configuration wants this issue
fn config_matches(config: &AlertConfiguration, issue: &Issue) -> bool {
    if !config.enabled {
        return false;
    }
    if issue.severity < config.severity_filter {
        return false;
    }
    match &config.issue_types {
        Some(types) => types.iter().any(|t| t == &issue.issue_type),
        None => true,
    }
}

#[derive(Clone)]
pub struct AlertDispatcher {
    repos: Repositories,
    http: reqwest::Client,
    webhook_queue: Queue,
    smtp: Option<SmtpConfig>,
    dashboard_url: String,
}

impl AlertDispatcher {
    pub fn new(
        repos: Repositories,
        http: reqwest::Client,
        webhook_queue: Queue,
        smtp: Option<SmtpConfig>,
        dashboard_url: String,
    ) -> Self {
        Self {
            repos,
            http,
            webhook_queue,
            smtp,
            dashboard_url,
        }
    }

    /// Dispatch one issue lifecycle event across the tenant's channels.
    /// This is the alert-dispatch queue handler's entry point.
    pub async fn dispatch(
        &self,
        org_id: Uuid,
        issue_id: Uuid,
        event: &str,
    ) -> DeliveryResult<usize> {
        let issue = self
            .repos
            .issues
            .find_by_id(org_id, issue_id)
            .await?
            .ok_or_else(|| DeliveryError::not_found("issue"))?;

        let configs = self.repos.alerts.list_enabled(org_id).await?;
        let mut dispatched = 0;

        for config in configs.iter().filter(|c| config_matches(c, &issue)) {
            let result = match config.channel {
                AlertChannel::Slack => self.send_slack(config, &issue).await,
                AlertChannel::Email => self.send_email(config, &issue).await,
                AlertChannel::Pagerduty => self.send_pagerduty(config, &issue).await,
                AlertChannel::Webhook => {
                    self.enqueue_webhook(org_id, config, issue_id, event).await
                }
            };

            // webhook deliveries log per-attempt from the worker instead
            if config.channel != AlertChannel::Webhook {
                let (success, status, error) = match &result {
                    Ok(status) => (true, *status, None),
                    Err(e) => (false, None, Some(e.to_string())),
                };
                self.repos
                    .alerts
                    .record_delivery(
                        org_id,
                        config.id,
                        issue_id,
                        config.channel,
                        success,
                        status,
                        error.as_deref(),
                    )
                    .await?;
            }

            match result {
                Ok(_) => dispatched += 1,
                Err(e) => warn!(
                    org_id = %org_id,
                    issue_id = %issue_id,
                    channel = config.channel.as_str(),
                    error = %e,
                    "alert dispatch failed"
                ),
            }
        }

        info!(
            org_id = %org_id,
            issue_id = %issue_id,
            dispatched,
            "alert dispatch completed"
        );
        Ok(dispatched)
    }

    async fn send_slack(
        &self,
        config: &AlertConfiguration,
        issue: &Issue,
    ) -> DeliveryResult<Option<i32>> {
        let text = format!(
            ":rotating_light: *{}* [{}]\n{}\nEstimated impact: {} · confidence {:.0}%\n{}/issues/{}",
            issue.title,
            issue.severity,
            issue.description,
            issue
                .estimated_revenue_cents
                .map(|c| format!("${:.2}", c as f64 / 100.0))
                .unwrap_or_else(|| "n/a".to_string()),
            issue.confidence * 100.0,
            self.dashboard_url,
            issue.id,
        );
        let response = self
            .http
            .post(&config.target)
            .json(&json!({ "text": text }))
            .timeout(DISPATCH_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(Some(status.as_u16() as i32))
        } else {
            Err(DeliveryError::EndpointRejected {
                status: status.as_u16(),
            })
        }
    }

    async fn send_email(
        &self,
        config: &AlertConfiguration,
        issue: &Issue,
    ) -> DeliveryResult<Option<i32>> {
        let smtp_config = self
            .smtp
            .as_ref()
            .ok_or_else(|| DeliveryError::Email("SMTP not configured".into()))?;
        let transport = smtp_transport(smtp_config)?;

        let body = format!(
            "{}\n\nSeverity: {}\nConfidence: {:.0}%\nEstimated revenue impact: {}\n\n{}/issues/{}\n",
            issue.description,
            issue.severity,
            issue.confidence * 100.0,
            issue
                .estimated_revenue_cents
                .map(|c| format!("${:.2}", c as f64 / 100.0))
                .unwrap_or_else(|| "n/a".to_string()),
            self.dashboard_url,
            issue.id,
        );
        let message = Message::builder()
            .from(
                smtp_config
                    .from
                    .parse()
                    .map_err(|e| DeliveryError::Email(format!("from address: {e}")))?,
            )
            .to(config
                .target
                .parse()
                .map_err(|e| DeliveryError::Email(format!("to address: {e}")))?)
            .subject(format!("[RevBack {}] {}", issue.severity, issue.title))
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| DeliveryError::Email(e.to_string()))?;

        transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Email(e.to_string()))?;
        Ok(None)
    }

    async fn send_pagerduty(
        &self,
        config: &AlertConfiguration,
        issue: &Issue,
    ) -> DeliveryResult<Option<i32>> {
        let severity = match issue.severity {
            revback_shared::IssueSeverity::Critical => "critical",
            revback_shared::IssueSeverity::Warning => "warning",
            revback_shared::IssueSeverity::Info => "info",
        };
        let payload = json!({
            "routing_key": config.target,
            "event_action": "trigger",
            "dedup_key": issue.id,
            "payload": {
                "summary": issue.title,
                "source": "revback",
                "severity": severity,
                "custom_details": issue.evidence,
            }
        });
        let response = self
            .http
            .post("https://events.pagerduty.com/v2/enqueue")
            .json(&payload)
            .timeout(DISPATCH_TIMEOUT)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(Some(status.as_u16() as i32))
        } else {
            Err(DeliveryError::EndpointRejected {
                status: status.as_u16(),
            })
        }
    }

    async fn enqueue_webhook(
        &self,
        org_id: Uuid,
        config: &AlertConfiguration,
        issue_id: Uuid,
        event: &str,
    ) -> DeliveryResult<Option<i32>> {
        let job = Job::new(
            revback_shared::queues::WEBHOOK_DELIVERY,
            json!({
                "org_id": org_id,
                "alert_config_id": config.id,
                "issue_id": issue_id,
                "event": event,
            }),
        )
        .with_retry_schedule(delivery_retry_schedule())
        .with_timeout(Duration::from_secs(15));
        self.webhook_queue.enqueue(&job).await?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use revback_shared::{DetectionTier, IssueSeverity, IssueStatus};

    fn issue(severity: IssueSeverity, issue_type: &str) -> Issue {
        let now = Utc::now();
        Issue {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            user_id: None,
            issue_type: issue_type.to_string(),
            severity,
            status: IssueStatus::Open,
            confidence: 0.9,
            estimated_revenue_cents: Some(1999),
            detector_id: issue_type.to_string(),
            detection_tier: DetectionTier::BillingOnly,
            evidence: json!({}),
            title: "t".into(),
            description: "d".into(),
            resolution: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    fn config(
        channel: AlertChannel,
        severity_filter: IssueSeverity,
        issue_types: Option<Vec<String>>,
    ) -> AlertConfiguration {
        let now = Utc::now();
        AlertConfiguration {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            channel,
            enabled: true,
            target: "https://hooks.slack.com/services/x".into(),
            severity_filter,
            issue_types,
            signing_secret: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn severity_filter_is_a_minimum() {
        let c = config(AlertChannel::Slack, IssueSeverity::Warning, None);
        assert!(!config_matches(&c, &issue(IssueSeverity::Info, "x")));
        assert!(config_matches(&c, &issue(IssueSeverity::Warning, "x")));
        assert!(config_matches(&c, &issue(IssueSeverity::Critical, "x")));
    }

    #[test]
    fn issue_type_filter_restricts_when_present() {
        let c = config(
            AlertChannel::Slack,
            IssueSeverity::Info,
            Some(vec!["paid_no_access".into()]),
        );
        assert!(config_matches(&c, &issue(IssueSeverity::Critical, "paid_no_access")));
        assert!(!config_matches(&c, &issue(IssueSeverity::Critical, "trial_no_conversion")));
    }

    #[test]
    fn disabled_configs_never_match() {
        let mut c = config(AlertChannel::Email, IssueSeverity::Info, None);
        c.enabled = false;
        assert!(!config_matches(&c, &issue(IssueSeverity::Critical, "x")));
    }
}
