//! Outbound webhook delivery worker
//!
//! POSTs signed envelopes to customer-registered endpoints. Retries follow
//! a fixed schedule approximating 1s, 5s, 30s, 2m, 15m, 1h, 6h; after the
//! seventh failure the job drops to the dead-letter pool and the operator
//! hears about it through the standard alert channels. Success is any 2xx.

use crate::error::{DeliveryError, DeliveryResult};
use crate::payload::{OutboundEnvelope, SIGNATURE_HEADER};
use revback_database::Repositories;
use revback_queue::job::ScheduledRetries;
use revback_queue::RetryPolicy;
use revback_shared::AlertChannel;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// The fixed retry ladder for customer webhook deliveries
pub fn delivery_retry_schedule() -> ScheduledRetries {
    RetryPolicy::from_schedule(&[
        Duration::from_secs(1),
        Duration::from_secs(5),
        Duration::from_secs(30),
        Duration::from_secs(120),
        Duration::from_secs(900),
        Duration::from_secs(3600),
        Duration::from_secs(21600),
    ])
}

#[derive(Clone)]
pub struct OutboundDelivery {
    repos: Repositories,
    http: reqwest::Client,
}

impl OutboundDelivery {
    pub fn new(repos: Repositories, http: reqwest::Client) -> Self {
        Self { repos, http }
    }

    /// Deliver one issue lifecycle event to one configured endpoint. This
    /// is the webhook-delivery queue handler's entry point; an `Err` makes
    /// the queue walk the retry ladder.
    pub async fn deliver(
        &self,
        org_id: Uuid,
        alert_config_id: Uuid,
        issue_id: Uuid,
        event: &str,
    ) -> DeliveryResult<()> {
        let config = self
            .repos
            .alerts
            .find_config(org_id, alert_config_id)
            .await?
            .ok_or_else(|| DeliveryError::not_found("alert configuration"))?;
        let issue = self
            .repos
            .issues
            .find_by_id(org_id, issue_id)
            .await?
            .ok_or_else(|| DeliveryError::not_found("issue"))?;

        let secret = config
            .signing_secret
            .clone()
            .ok_or_else(|| DeliveryError::not_found("signing secret"))?;

        let envelope = OutboundEnvelope::new(event, org_id, json!({ "issue": issue }));
        let (body, signature) = envelope.sign(&secret)?;

        let result = self
            .http
            .post(&config.target)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body)
            .timeout(DELIVERY_TIMEOUT)
            .send()
            .await;

        let (success, status, error) = match &result {
            Ok(response) if response.status().is_success() => {
                (true, Some(response.status().as_u16() as i32), None)
            }
            Ok(response) => (
                false,
                Some(response.status().as_u16() as i32),
                Some(format!("HTTP {}", response.status())),
            ),
            Err(e) => (false, None, Some(e.to_string())),
        };

        self.repos
            .alerts
            .record_delivery(
                org_id,
                alert_config_id,
                issue_id,
                AlertChannel::Webhook,
                success,
                status,
                error.as_deref(),
            )
            .await?;

        if success {
            debug!(org_id = %org_id, issue_id = %issue_id, event, "webhook delivered");
            Ok(())
        } else {
            warn!(
                org_id = %org_id,
                issue_id = %issue_id,
                event,
                status = status.unwrap_or(0),
                "webhook delivery attempt failed"
            );
            match result {
                Ok(response) => Err(DeliveryError::EndpointRejected {
                    status: response.status().as_u16(),
                }),
                Err(e) => Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_ladder_matches_the_published_intervals() {
        let schedule = delivery_retry_schedule();
        assert_eq!(
            schedule.delays_ms,
            vec![1_000, 5_000, 30_000, 120_000, 900_000, 3_600_000, 21_600_000]
        );
        // 1 initial attempt + 7 retries, then dead-letter
        assert_eq!(schedule.max_attempts(), 8);
    }
}
