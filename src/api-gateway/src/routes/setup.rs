//! Onboarding and billing-connection setup

use crate::auth::AuthContext;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::Json;
use revback_security::mint_api_key;
use revback_shared::{queues, scopes, BillingSource};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CreateOrgRequest {
    pub slug: String,
    pub name: String,
}

/// Public sign-up: creates the tenant and returns the only-once API key
pub async fn create_org(
    State(state): State<AppState>,
    Json(request): Json<CreateOrgRequest>,
) -> ApiResult<Json<Value>> {
    let slug = request.slug.trim().to_lowercase();
    if slug.is_empty() || !slug.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ApiError::validation_with(
            "slug must be URL-safe",
            json!({ "slug": "lowercase letters, digits and dashes only" }),
        ));
    }
    if request.name.trim().is_empty() {
        return Err(ApiError::validation("name must not be empty"));
    }
    if state
        .db
        .repos()
        .organizations
        .find_by_slug(&slug)
        .await?
        .is_some()
    {
        return Err(ApiError::conflict("slug already taken"));
    }

    let org = state
        .db
        .repos()
        .organizations
        .create(&slug, request.name.trim())
        .await?;

    let minted = mint_api_key();
    let key = state
        .db
        .repos()
        .api_keys
        .insert(org.id, "default", &minted.key_hash, &minted.key_prefix, None, None)
        .await?;

    state.scheduler.register_org(org.id).await?;

    info!(org_id = %org.id, slug = %org.slug, "organization created");
    Ok(Json(json!({
        "organization": org,
        "api_key": {
            "id": key.id,
            "prefix": key.key_prefix,
            // shown exactly once; only the hash is stored
            "secret": minted.secret,
        }
    })))
}

#[derive(Debug, Deserialize)]
pub struct ConnectionRequest {
    pub credentials: Value,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub original_notification_url: Option<String>,
}

/// Upsert a provider connection, encrypting the credentials at rest
pub async fn upsert_connection(
    State(state): State<AppState>,
    Path(source): Path<String>,
    auth: AuthContext,
    Json(request): Json<ConnectionRequest>,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_WRITE)?;
    let source: BillingSource = source
        .parse()
        .map_err(|_| ApiError::not_found("billing source"))?;
    if !request.credentials.is_object() {
        return Err(ApiError::validation("credentials must be an object"));
    }

    let ciphertext = state.cipher.encrypt_json(&request.credentials)?;
    let connection = state
        .db
        .repos()
        .connections
        .upsert(
            auth.org_id,
            source,
            &ciphertext,
            request.webhook_secret.as_deref(),
            request.original_notification_url.as_deref(),
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
            "connection.upserted",
            "billing_connection",
            Some(connection.id.to_string()),
            json!({ "source": source }),
        )
        .await?;

    Ok(Json(json!({ "connection": connection })))
}

/// Live probes against the provider; pass/fail per check
pub async fn verify_connection(
    State(state): State<AppState>,
    Path(source): Path<String>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_READ)?;
    let source: BillingSource = source
        .parse()
        .map_err(|_| ApiError::not_found("billing source"))?;

    let connection = state
        .db
        .repos()
        .connections
        .find(auth.org_id, source)
        .await?
        .ok_or_else(|| ApiError::not_found("billing connection"))?;

    let mut checks = Vec::new();

    let decrypts = state.cipher.decrypt_json::<Value>(&connection.credentials);
    checks.push(json!({
        "check": "credentials_decrypt",
        "passed": decrypts.is_ok(),
    }));

    // shallow live probe: an authenticated listing call per provider
    if let Ok(credentials) = decrypts {
        let probe = match source {
            BillingSource::Stripe => {
                probe_get(
                    &state,
                    "https://api.stripe.com/v1/subscriptions?limit=1",
                    credentials["api_key"].as_str(),
                )
                .await
            }
            BillingSource::Recurly => {
                probe_basic(
                    &state,
                    "https://v3.recurly.com/subscriptions?limit=1",
                    credentials["api_key"].as_str(),
                )
                .await
            }
            // Apple and Google probes are covered by backfill's first call;
            // here we only confirm the credential fields are present
            BillingSource::Apple => Ok(credentials["key_id"].is_string()
                && credentials["issuer_id"].is_string()
                && credentials["private_key"].is_string()),
            BillingSource::Google => Ok(credentials["client_email"].is_string()
                && credentials["private_key"].is_string()
                && credentials["package_name"].is_string()),
            BillingSource::Braintree => Ok(false),
        };
        checks.push(json!({
            "check": "provider_reachable",
            "passed": probe.unwrap_or(false),
        }));
    }

    let all_passed = checks
        .iter()
        .all(|c| c["passed"].as_bool().unwrap_or(false));
    Ok(Json(json!({ "passed": all_passed, "checks": checks })))
}

async fn probe_get(state: &AppState, url: &str, api_key: Option<&str>) -> Result<bool, ApiError> {
    let Some(api_key) = api_key else { return Ok(false) };
    let response = state
        .http
        .get(url)
        .bearer_auth(api_key)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(response.status().is_success())
}

async fn probe_basic(state: &AppState, url: &str, api_key: Option<&str>) -> Result<bool, ApiError> {
    let Some(api_key) = api_key else { return Ok(false) };
    let response = state
        .http
        .get(url)
        .basic_auth(api_key, Option::<&str>::None)
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(response.status().is_success())
}

/// Tenant integration-health summary
pub async fn status(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_READ)?;
    let repos = state.db.repos();

    let connections = repos.connections.list_for_org(auth.org_id).await?;
    let mut per_source = Vec::new();
    for connection in &connections {
        let event_count = repos
            .events
            .count_by_source(auth.org_id, connection.source)
            .await?;
        let progress = state
            .backfill
            .progress_store()
            .read(connection.source, auth.org_id)
            .await
            .ok()
            .flatten();
        per_source.push(json!({
            "source": connection.source,
            "active": connection.active,
            "last_webhook_at": connection.last_webhook_at,
            "sync_status": connection.sync_status,
            "event_count": event_count,
            "backfill": progress,
        }));
    }

    let total_events = repos.events.count_for_org(auth.org_id).await?;
    Ok(Json(json!({
        "connections": per_source,
        "total_events": total_events,
    })))
}

/// Kick off a backfill; 409 when one is already running
pub async fn trigger_backfill(
    State(state): State<AppState>,
    Path(source): Path<String>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_WRITE)?;
    let source: BillingSource = source
        .parse()
        .map_err(|_| ApiError::not_found("billing source"))?;

    state
        .db
        .repos()
        .connections
        .find(auth.org_id, source)
        .await?
        .ok_or_else(|| ApiError::not_found("billing connection"))?;

    if let Some(progress) = state
        .backfill
        .progress_store()
        .read(source, auth.org_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
    {
        if progress.is_in_progress() {
            return Err(ApiError::conflict("backfill already in progress"));
        }
    }

    let job = revback_queue::Job::new(
        queues::INGESTION_BACKFILL,
        json!({ "org_id": auth.org_id, "source": source }),
    )
    .with_timeout(Duration::from_secs(3600));
    state.queues.ingestion_backfill.enqueue(&job).await?;

    state
        .db
        .repos()
        .audit
        .append(
            auth.org_id,
            "api_key",
            &auth.api_key.id.to_string(),
            "backfill.triggered",
            "billing_connection",
            None,
            json!({ "source": source }),
        )
        .await?;

    Ok(Json(json!({ "queued": true })))
}

/// Read backfill progress for every connected source
pub async fn backfill_progress(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Value>> {
    auth.require(scopes::ADMIN_READ)?;
    let connections = state.db.repos().connections.list_for_org(auth.org_id).await?;
    let mut progress = serde_json::Map::new();
    for connection in &connections {
        let p = state
            .backfill
            .progress_store()
            .read(connection.source, auth.org_id)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
        progress.insert(connection.source.to_string(), json!(p));
    }
    Ok(Json(Value::Object(progress)))
}
