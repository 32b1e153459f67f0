//! Bearer-token authentication
//!
//! `Authorization: Bearer rev_<hex>`. The presented secret is hashed and
//! looked up; the row carries the tenant and the scope list. Handlers call
//! [`AuthContext::require`] before touching anything scope-gated.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::Utc;
use revback_security::hash_api_key;
use revback_shared::ApiKey;
use uuid::Uuid;

/// The authenticated caller
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub org_id: Uuid,
    pub api_key: ApiKey,
}

impl AuthContext {
    /// Scope gate; 403 when the key lacks the scope
    pub fn require(&self, scope: &str) -> Result<(), ApiError> {
        if self.api_key.has_scope(scope) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(scope.to_string()))
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("missing Authorization header"))?;

        let secret = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::unauthorized("expected bearer token"))?;
        if !secret.starts_with("rev_") {
            return Err(ApiError::unauthorized("malformed API key"));
        }

        let key = state
            .db
            .repos()
            .api_keys
            .find_by_hash(&hash_api_key(secret))
            .await?
            .ok_or_else(|| ApiError::unauthorized("unknown API key"))?;

        if !key.is_active(Utc::now()) {
            return Err(ApiError::unauthorized("API key revoked or expired"));
        }

        Ok(AuthContext {
            org_id: key.org_id,
            api_key: key,
        })
    }
}
