//! API key repository

use crate::error::DbResult;
use chrono::{DateTime, Utc};
use revback_shared::ApiKey;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiKeyRepository {
    pool: PgPool,
}

fn map_key(row: PgRow) -> DbResult<ApiKey> {
    Ok(ApiKey {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        key_hash: row.try_get("key_hash")?,
        key_prefix: row.try_get("key_prefix")?,
        scopes: row.try_get("scopes")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        created_at: row.try_get("created_at")?,
    })
}

impl ApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        org_id: Uuid,
        name: &str,
        key_hash: &str,
        key_prefix: &str,
        scopes: Option<&[String]>,
        expires_at: Option<DateTime<Utc>>,
    ) -> DbResult<ApiKey> {
        let row = sqlx::query(
            "INSERT INTO api_keys (org_id, name, key_hash, key_prefix, scopes, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(org_id)
        .bind(name)
        .bind(key_hash)
        .bind(key_prefix)
        .bind(scopes)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;
        map_key(row)
    }

    /// Lookup by the SHA-256 hash of a presented secret. This is the auth
    /// middleware's hot path; the hash column is uniquely indexed.
    pub async fn find_by_hash(&self, key_hash: &str) -> DbResult<Option<ApiKey>> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_key).transpose()
    }

    pub async fn revoke(&self, org_id: Uuid, key_id: Uuid) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE api_keys SET revoked_at = now() \
             WHERE id = $1 AND org_id = $2 AND revoked_at IS NULL",
        )
        .bind(key_id)
        .bind(org_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
