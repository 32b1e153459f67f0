//! Tier-2 access reports and GDPR tooling

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use revback_shared::scopes;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct AccessCheckRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub product_id: Option<Uuid>,
    pub has_access: bool,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Record an app-side access report (input to Tier-2 detectors)
pub async fn record_access_check(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<AccessCheckRequest>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::USERS_READ)?;

    state
        .db
        .repos()
        .users
        .find_by_id(auth.org_id, request.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;

    let check = state
        .db
        .repos()
        .access_checks
        .insert(
            auth.org_id,
            request.user_id,
            request.product_id,
            request.has_access,
            request.checked_at.unwrap_or_else(Utc::now),
            request.metadata.as_ref().unwrap_or(&json!({})),
        )
        .await?;

    Ok(Json(json!({ "access_check": check })))
}

/// GDPR deletion: removes the user and all dependent rows
pub async fn delete_user_data(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_WRITE)?;

    state
        .db
        .repos()
        .users
        .find_by_id(auth.org_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;

    state
        .db
        .repos()
        .users
        .delete_user_data(auth.org_id, user_id)
        .await?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "user.data_deleted",
            "user",
            Some(user_id.to_string()),
            json!({}),
        )
        .await?;

    Ok(Json(json!({ "deleted": true })))
}

/// GDPR export: one JSON document with everything we hold on the user
pub async fn export_user_data(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_READ)?;
    let repos = state.db.repos();

    let user = repos
        .users
        .find_by_id(auth.org_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;
    let identities = repos.users.identities_for_user(auth.org_id, user_id).await?;
    let events = repos.events.list_for_user(auth.org_id, user_id, 10_000).await?;
    let entitlements = repos.entitlements.list_for_user(auth.org_id, user_id).await?;
    let issues = repos.issues.list_for_user(auth.org_id, user_id).await?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "user.data_exported",
            "user",
            Some(user_id.to_string()),
            json!({ "events": events.len() }),
        )
        .await?;

    Ok(Json(json!({
        "user": user,
        "identities": identities,
        "events": events,
        "entitlements": entitlements,
        "issues": issues,
        "exported_at": Utc::now(),
    })))
}
