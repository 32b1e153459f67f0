//! Dashboard read models

use crate::auth::AuthContext;
use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use chrono::{Duration, Utc};
use revback_shared::scopes;
use serde_json::{json, Value};

/// First-look summary shown right after onboarding
pub async fn first_look(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Value>> {
    auth.require(scopes::ISSUES_READ)?;
    let repos = state.db.repos();

    let totals = repos.issues.open_totals(auth.org_id).await?;
    let total_events = repos.events.count_for_org(auth.org_id).await?;
    let recent_webhooks = repos
        .webhook_logs
        .count_since(auth.org_id, Utc::now() - Duration::hours(24))
        .await?;

    Ok(Json(json!({
        "open_issues": totals.open_count,
        "critical_issues": totals.critical_count,
        "estimated_revenue_at_risk_cents": totals.estimated_revenue_cents,
        "total_events": total_events,
        "webhooks_last_24h": recent_webhooks,
    })))
}

/// Revenue impact over the trailing 30 days
pub async fn revenue_impact(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ISSUES_READ)?;
    let repos = state.db.repos();

    let since = Utc::now() - Duration::days(30);
    let by_type = repos.events.revenue_by_type(auth.org_id, since).await?;
    let totals = repos.issues.open_totals(auth.org_id).await?;

    Ok(Json(json!({
        "window_days": 30,
        "revenue_by_event_type": by_type,
        "open_issue_revenue_cents": totals.estimated_revenue_cents,
    })))
}

/// Entitlement state distribution
pub async fn entitlement_health(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::USERS_READ)?;
    let counts = state
        .db
        .repos()
        .entitlements
        .counts_by_state(auth.org_id)
        .await?;
    Ok(Json(json!({ "states": counts })))
}
