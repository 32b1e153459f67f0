//! Alert configuration CRUD, test dispatch and signing-secret reveal

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use revback_delivery::generate_signing_secret;
use revback_shared::{scopes, AlertChannel, IssueSeverity};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateAlertRequest {
    pub channel: String,
    pub target: String,
    #[serde(default)]
    pub severity_filter: Option<String>,
    #[serde(default)]
    pub issue_types: Option<Vec<String>>,
}

pub async fn create(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateAlertRequest>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ALERTS_WRITE)?;

    let channel: AlertChannel = request
        .channel
        .parse()
        .map_err(|e: revback_shared::UnknownVariant| ApiError::validation(e.to_string()))?;
    let severity_filter = match request.severity_filter.as_deref() {
        Some(s) => s
            .parse::<IssueSeverity>()
            .map_err(|e| ApiError::validation(e.to_string()))?,
        None => IssueSeverity::Info,
    };
    if request.target.trim().is_empty() {
        return Err(ApiError::validation("target must not be empty"));
    }

    // webhook channels get a server-generated signing secret
    let signing_secret = match channel {
        AlertChannel::Webhook => Some(generate_signing_secret()),
        _ => None,
    };

    let config = state
        .db
        .repos()
        .alerts
        .insert_config(
            auth.org_id,
            channel,
            request.target.trim(),
            severity_filter,
            request.issue_types.as_deref(),
            signing_secret.as_deref(),
        )
        .await?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "alert_config.created",
            "alert_configuration",
            Some(config.id.to_string()),
            json!({ "channel": channel }),
        )
        .await?;

    Ok(Json(json!({ "alert": config })))
}

pub async fn list(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Value>> {
    auth.require(scopes::ALERTS_READ)?;
    let configs = state.db.repos().alerts.list_configs(auth.org_id).await?;
    Ok(Json(json!({ "alerts": configs })))
}

pub async fn get_one(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ALERTS_READ)?;
    let config = state
        .db
        .repos()
        .alerts
        .find_config(auth.org_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("alert configuration"))?;
    Ok(Json(json!({ "alert": config })))
}

#[derive(Debug, Deserialize, Default)]
pub struct UpdateAlertRequest {
    pub enabled: Option<bool>,
    pub target: Option<String>,
    pub severity_filter: Option<String>,
    pub issue_types: Option<Vec<String>>,
}

pub async fn update(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateAlertRequest>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ALERTS_WRITE)?;

    let severity_filter = request
        .severity_filter
        .as_deref()
        .map(|s| s.parse::<IssueSeverity>())
        .transpose()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let config = state
        .db
        .repos()
        .alerts
        .update_config(
            auth.org_id,
            id,
            request.enabled,
            request.target.as_deref(),
            severity_filter,
            request.issue_types.as_deref(),
        )
        .await?
        .ok_or_else(|| ApiError::not_found("alert configuration"))?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "alert_config.updated",
            "alert_configuration",
            Some(config.id.to_string()),
            json!({}),
        )
        .await?;

    Ok(Json(json!({ "alert": config })))
}

pub async fn remove(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ALERTS_WRITE)?;
    let removed = state.db.repos().alerts.delete_config(auth.org_id, id).await?;
    if !removed {
        return Err(ApiError::not_found("alert configuration"));
    }

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "alert_config.deleted",
            "alert_configuration",
            Some(id.to_string()),
            json!({}),
        )
        .await?;

    Ok(Json(json!({ "deleted": true })))
}

/// Send a synthetic test alert through this configuration's channel
pub async fn test(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ALERTS_WRITE)?;
    let config = state
        .db
        .repos()
        .alerts
        .find_config(auth.org_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("alert configuration"))?;

    // a test fires the most recent open issue through the channel, or
    // reports there is nothing to send
    let filter = revback_database::repositories::IssueFilter {
        status: Some(revback_shared::IssueStatus::Open),
        limit: 1,
        ..Default::default()
    };
    let issues = state.db.repos().issues.list(auth.org_id, &filter).await?;
    let Some(issue) = issues.first() else {
        return Ok(Json(json!({ "sent": false, "reason": "no open issues to send" })));
    };

    let sent = state
        .dispatcher
        .dispatch(auth.org_id, issue.id, "issue.created")
        .await?;
    Ok(Json(json!({ "sent": sent > 0, "channel": config.channel })))
}

/// Reveal the webhook signing secret (shown to the customer once)
pub async fn signing_secret(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ALERTS_WRITE)?;
    let config = state
        .db
        .repos()
        .alerts
        .find_config(auth.org_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("alert configuration"))?;
    let secret = config
        .signing_secret
        .ok_or_else(|| ApiError::not_found("signing secret"))?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "alert_config.secret_revealed",
            "alert_configuration",
            Some(id.to_string()),
            json!({}),
        )
        .await?;

    Ok(Json(json!({ "signing_secret": secret })))
}
