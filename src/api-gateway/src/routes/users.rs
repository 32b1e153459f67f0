//! Canonical user read endpoints

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use revback_shared::scopes;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::USERS_READ)?;
    let users = state
        .db
        .repos()
        .users
        .list(
            auth.org_id,
            query.limit.unwrap_or(50).clamp(1, 200),
            query.offset.unwrap_or(0).max(0),
        )
        .await?;
    Ok(Json(json!({ "users": users })))
}

pub async fn get_one(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::USERS_READ)?;
    let user = state
        .db
        .repos()
        .users
        .find_by_id(auth.org_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;
    Ok(Json(json!({ "user": user })))
}

pub async fn timeline(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::EVENTS_READ)?;
    ensure_user(&state, auth.org_id, user_id).await?;
    let events = state
        .db
        .repos()
        .events
        .list_for_user(auth.org_id, user_id, 200)
        .await?;
    Ok(Json(json!({ "events": events })))
}

pub async fn entitlements(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::USERS_READ)?;
    ensure_user(&state, auth.org_id, user_id).await?;
    let entitlements = state
        .db
        .repos()
        .entitlements
        .list_for_user(auth.org_id, user_id)
        .await?;
    Ok(Json(json!({ "entitlements": entitlements })))
}

pub async fn identities(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::USERS_READ)?;
    ensure_user(&state, auth.org_id, user_id).await?;
    let identities = state
        .db
        .repos()
        .users
        .identities_for_user(auth.org_id, user_id)
        .await?;
    Ok(Json(json!({ "identities": identities })))
}

pub async fn issues(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ISSUES_READ)?;
    ensure_user(&state, auth.org_id, user_id).await?;
    let issues = state
        .db
        .repos()
        .issues
        .list_for_user(auth.org_id, user_id)
        .await?;
    Ok(Json(json!({ "issues": issues })))
}

async fn ensure_user(state: &AppState, org_id: Uuid, user_id: Uuid) -> ApiResult<()> {
    state
        .db
        .repos()
        .users
        .find_by_id(org_id, user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("user"))?;
    Ok(())
}
