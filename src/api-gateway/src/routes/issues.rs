//! Issue triage endpoints

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use revback_database::repositories::IssueFilter;
use revback_queue::Job;
use revback_shared::{queues, scopes, IssueSeverity, IssueStatus};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub issue_type: Option<String>,
    pub user_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ISSUES_READ)?;

    let status = query
        .status
        .as_deref()
        .map(|s| s.parse::<IssueStatus>())
        .transpose()
        .map_err(|e| ApiError::validation(e.to_string()))?;
    let severity = query
        .severity
        .as_deref()
        .map(|s| s.parse::<IssueSeverity>())
        .transpose()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let filter = IssueFilter {
        status,
        severity,
        issue_type: query.issue_type,
        user_id: query.user_id,
        limit: query.limit.unwrap_or(50).clamp(1, 200),
        offset: query.offset.unwrap_or(0).max(0),
    };
    let issues = state.db.repos().issues.list(auth.org_id, &filter).await?;
    Ok(Json(json!({ "issues": issues })))
}

pub async fn get_one(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ISSUES_READ)?;
    let issue = state
        .db
        .repos()
        .issues
        .find_by_id(auth.org_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("issue"))?;
    Ok(Json(json!({ "issue": issue })))
}

#[derive(Debug, Deserialize, Default)]
pub struct ResolutionRequest {
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn acknowledge(
    state: State<AppState>,
    auth: AuthContext,
    path: Path<Uuid>,
    body: Option<Json<ResolutionRequest>>,
) -> ApiResult<Json<Value>> {
    transition(state, auth, path, body, IssueStatus::Acknowledged, "issue.acknowledged").await
}

pub async fn resolve(
    state: State<AppState>,
    auth: AuthContext,
    path: Path<Uuid>,
    body: Option<Json<ResolutionRequest>>,
) -> ApiResult<Json<Value>> {
    transition(state, auth, path, body, IssueStatus::Resolved, "issue.resolved").await
}

pub async fn dismiss(
    state: State<AppState>,
    auth: AuthContext,
    path: Path<Uuid>,
    body: Option<Json<ResolutionRequest>>,
) -> ApiResult<Json<Value>> {
    transition(state, auth, path, body, IssueStatus::Dismissed, "issue.dismissed").await
}

async fn transition(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    body: Option<Json<ResolutionRequest>>,
    status: IssueStatus,
    event: &str,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ISSUES_WRITE)?;

    let resolution = body.and_then(|Json(r)| {
        r.note.map(|note| {
            json!({
                "note": note,
                "actor": auth.api_key.id,
            })
        })
    });

    let issue = state
        .db
        .repos()
        .issues
        .update_status(auth.org_id, id, status, resolution)
        .await?
        .ok_or_else(|| ApiError::not_found("issue"))?;

    // lifecycle changes fan out to customer endpoints like creations do
    let job = Job::new(
        queues::ALERT_DISPATCH,
        json!({ "org_id": auth.org_id, "issue_id": issue.id, "event": event }),
    );
    state.queues.alert_dispatch.enqueue(&job).await?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            event,
            "issue",
            Some(issue.id.to_string()),
            json!({ "status": status }),
        )
        .await?;

    Ok(Json(json!({ "issue": issue })))
}
