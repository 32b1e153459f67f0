//! Inbound provider webhook receiver
//!
//! The receiver does as little as possible so the provider's timeout never
//! trips: resolve the tenant, verify the signature when configured, log
//! the raw webhook, enqueue the processing job, answer 200. Business
//! errors are queue concerns; only an unknown tenant (404) or a bad
//! signature (401) reach the provider.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use revback_ingestion::{normalizer_for, ConnectionContext, InboundWebhook};
use revback_shared::{queues, BillingSource, ProcessingStatus};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

pub async fn receive(
    State(state): State<AppState>,
    Path((org_slug, source)): Path<(String, String)>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let source: BillingSource = source
        .parse()
        .map_err(|_| ApiError::not_found("webhook source"))?;
    if !BillingSource::webhook_sources().contains(&source) {
        return Err(ApiError::not_found("webhook source"));
    }

    let org = state
        .db
        .repos()
        .organizations
        .find_by_slug(&org_slug)
        .await?
        .ok_or_else(|| ApiError::not_found("organization"))?;

    let connection = state
        .db
        .repos()
        .connections
        .find(org.id, source)
        .await?
        .ok_or_else(|| ApiError::not_found("billing connection"))?;

    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    // verify before logging as queued: signature failures are 401, never
    // enqueued, logged as failed
    if let Some(normalizer) = normalizer_for(source, state.http.clone()) {
        let must_verify = matches!(source, BillingSource::Apple | BillingSource::Google)
            || connection.webhook_secret.is_some();
        if must_verify {
            let webhook = InboundWebhook {
                body: body.clone(),
                headers: header_map.clone(),
            };
            let ctx = ConnectionContext {
                webhook_secret: connection.webhook_secret.clone(),
                credentials: None,
                endpoint_url: Some(format!(
                    "{}/webhooks/{}/{}",
                    state.config.dashboard_url.trim_end_matches('/'),
                    org.slug,
                    source
                )),
            };
            if let Err(e) = normalizer.verify_signature(&webhook, &ctx).await {
                warn!(org_id = %org.id, source = %source, error = %e, "webhook signature rejected");
                state
                    .db
                    .repos()
                    .webhook_logs
                    .insert(
                        org.id,
                        source,
                        ProcessingStatus::Failed,
                        Some(&json!(header_map)),
                        Some(&body),
                        None,
                    )
                    .await?;
                return Err(ApiError::unauthorized("invalid signature"));
            }
        }
    }

    let log = state
        .db
        .repos()
        .webhook_logs
        .insert(
            org.id,
            source,
            ProcessingStatus::Queued,
            Some(&json!(header_map)),
            Some(&body),
            None,
        )
        .await?;

    let job = revback_queue::Job::new(
        queues::WEBHOOK_PROCESSING,
        json!({
            "org_id": org.id,
            "source": source,
            "webhook_log_id": log.id,
        }),
    );
    if let Err(e) = state.queues.webhook_processing.enqueue(&job).await {
        // I7: reflect the enqueue failure on the log before failing
        state
            .db
            .repos()
            .webhook_logs
            .set_status(
                org.id,
                log.id,
                ProcessingStatus::Failed,
                Some(&format!("enqueue failed: {e}")),
            )
            .await?;
        return Err(e.into());
    }

    // freshness marker and Apple proxy forward are both fire-and-forget
    {
        let repos = state.db.repos().clone();
        let org_id = org.id;
        tokio::spawn(async move {
            if let Err(e) = repos.connections.touch_last_webhook(org_id, source).await {
                debug!(org_id = %org_id, error = %e, "could not touch last_webhook_at");
            }
        });
    }
    if source == BillingSource::Apple {
        if let Some(destination) = connection.original_notification_url.clone() {
            state.apple_proxy.forward(org.id, log.id, destination, body);
        }
    }

    Ok(Json(json!({ "ok": true, "webhook_log_id": log.id })))
}
