//! Recurly historical import
//!
//! Pages `GET /subscriptions` with Recurly's cursor pagination and
//! synthesizes `new_subscription` webhook payloads for the trusted
//! pipeline entry.

use crate::engine::BackfillContext;
use crate::error::{BackfillError, BackfillResult};
use revback_ingestion::InboundWebhook;
use revback_shared::{BackfillStatus, BillingSource};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const PAGE_SIZE: u32 = 200;
const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const RATE_LIMIT_WAIT: Duration = Duration::from_secs(10);

pub struct RecurlyBackfill {
    api_base: String,
}

impl RecurlyBackfill {
    pub fn new() -> Self {
        Self {
            api_base: "https://v3.recurly.com".to_string(),
        }
    }

    pub fn with_api_base(mut self, base: String) -> Self {
        self.api_base = base;
        self
    }

    pub async fn run(&self, ctx: &BackfillContext) -> BackfillResult<u64> {
        let api_key = ctx.credentials["api_key"]
            .as_str()
            .ok_or_else(|| BackfillError::Credentials("recurly api_key missing".into()))?
            .to_string();

        ctx.progress
            .update(ctx.connection.source, ctx.org_id, |p| {
                p.status = BackfillStatus::ImportingSubscriptions;
            })
            .await?;

        let mut processed: u64 = 0;
        let mut cursor: Option<String> = None;

        loop {
            ctx.limiter.consume(1, RATE_LIMIT_WAIT).await?;

            let mut url = format!("{}/subscriptions?limit={}", self.api_base, PAGE_SIZE);
            if let Some(c) = &cursor {
                url.push_str(&format!("&cursor={c}"));
            }

            let response = ctx
                .breaker
                .execute(async {
                    ctx.http
                        .get(&url)
                        .basic_auth(&api_key, Option::<&str>::None)
                        .header("Accept", "application/vnd.recurly.v2021-02-25+json")
                        .timeout(CALL_TIMEOUT)
                        .send()
                        .await
                })
                .await??;

            let status = response.status();
            if !status.is_success() {
                return Err(BackfillError::provider_api(
                    "recurly",
                    status.as_u16(),
                    response.text().await.unwrap_or_default(),
                ));
            }

            let page: Value = response.json().await?;
            let empty = Vec::new();
            let subscriptions = page["data"].as_array().unwrap_or(&empty);
            if subscriptions.is_empty() {
                break;
            }

            for subscription in subscriptions {
                let sub_id = subscription["id"].as_str().unwrap_or_default().to_string();
                let envelope = synthesize_subscription_event(subscription);
                let webhook = InboundWebhook::new(envelope.to_string());
                match ctx
                    .pipeline
                    .process_trusted(ctx.org_id, BillingSource::Recurly, &webhook)
                    .await
                {
                    Ok(_) => {
                        processed += 1;
                        ctx.bump_processed().await;
                    }
                    Err(e) => {
                        ctx.record_error(format!("subscription {sub_id}: {e}")).await;
                    }
                }
            }

            debug!(processed, "recurly backfill page complete");
            cursor = page["next"]
                .as_str()
                .and_then(|next| next.rsplit("cursor=").next())
                .map(str::to_string);
            if page["has_more"].as_bool() != Some(true) || cursor.is_none() {
                break;
            }
        }

        Ok(processed)
    }
}

impl Default for RecurlyBackfill {
    fn default() -> Self {
        Self::new()
    }
}

fn synthesize_subscription_event(subscription: &Value) -> Value {
    let sub_id = subscription["id"].as_str().unwrap_or_default();
    json!({
        "id": format!("backfill-{sub_id}"),
        "event_type": "new_subscription",
        "event_time": subscription["created_at"],
        "data": {
            "account": subscription["account"],
            "subscription": subscription
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_envelope_carries_the_discriminator() {
        let subscription = json!({
            "id": "rcl-sub-1",
            "created_at": "2026-01-15T00:00:00Z",
            "account": {"code": "user-1", "email": "u@example.com"},
            "plan": {"code": "pro"}
        });
        let envelope = synthesize_subscription_event(&subscription);
        assert_eq!(envelope["event_type"], "new_subscription");
        assert_eq!(envelope["id"], "backfill-rcl-sub-1");
        assert_eq!(envelope["data"]["account"]["code"], "user-1");
    }
}
