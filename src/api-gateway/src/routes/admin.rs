//! Operator endpoints: manual scans and queue health

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use revback_queue::Job;
use revback_shared::{queues, scopes};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct TriggerScanRequest {
    pub detector_id: String,
}

/// Enqueue an immediate scan for one detector
pub async fn trigger_scan(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<TriggerScanRequest>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_WRITE)?;

    let detector = state
        .detection
        .registry()
        .get(&request.detector_id)
        .ok_or_else(|| ApiError::not_found("detector"))?;
    if detector.scan_cron().is_none() {
        return Err(ApiError::validation(format!(
            "{} is event-triggered only",
            request.detector_id
        )));
    }

    let job = Job::new(
        queues::SCHEDULED_SCANS,
        json!({ "org_id": auth.org_id, "detector_id": request.detector_id }),
    );
    state.queues.scheduled_scans.enqueue(&job).await?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "scan.triggered",
            "detector",
            Some(request.detector_id.clone()),
            json!({}),
        )
        .await?;

    Ok(Json(json!({ "queued": true })))
}

/// Recent scan activity, from the scan queue's job listings
pub async fn scan_history(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_READ)?;
    use revback_queue::queue::JobState;

    let queue = &state.queues.scheduled_scans;
    let dead = queue.list_jobs(JobState::Dead, 50).await?;
    let active = queue.list_jobs(JobState::Active, 50).await?;
    let waiting = queue.list_jobs(JobState::Waiting, 50).await?;

    let org_id = auth.org_id.to_string();
    let for_org = |jobs: Vec<revback_queue::Job>| -> Vec<Value> {
        jobs.into_iter()
            .filter(|j| j.payload["org_id"].as_str() == Some(org_id.as_str()))
            .map(|j| {
                json!({
                    "job_id": j.id,
                    "detector_id": j.payload["detector_id"],
                    "attempts_made": j.attempts_made,
                    "enqueued_at": j.enqueued_at,
                    "last_error": j.last_error,
                })
            })
            .collect()
    };

    Ok(Json(json!({
        "waiting": for_org(waiting),
        "active": for_org(active),
        "dead_lettered": for_org(dead),
    })))
}

/// The registered scan schedules for this tenant
pub async fn scan_schedules(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_READ)?;

    let org = state
        .db
        .repos()
        .organizations
        .find_by_id(auth.org_id)
        .await?
        .ok_or_else(|| ApiError::not_found("organization"))?;

    let schedules: Vec<Value> = state
        .detection
        .registry()
        .scheduled()
        .map(|d| {
            let default_cron = d.scan_cron().expect("scheduled() filters on this");
            let override_cron = org.settings["scan_schedules"][d.id()].as_str();
            json!({
                "detector_id": d.id(),
                "name": d.name(),
                "cron": override_cron.unwrap_or(default_cron),
                "overridden": override_cron.is_some(),
            })
        })
        .collect();

    Ok(Json(json!({ "schedules": schedules })))
}

/// Queue health: counts, rate, latency, oldest-waiting age
pub async fn queues(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_READ)?;
    let mut stats = Vec::with_capacity(6);
    for queue in state.queues.all() {
        stats.push(queue.stats().await?);
    }
    Ok(Json(json!({ "queues": stats })))
}
