//! Access check repository (Tier-2 app-verified detections)

use crate::error::DbResult;
use chrono::{DateTime, Utc};
use revback_shared::AccessCheck;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct AccessCheckRepository {
    pool: PgPool,
}

fn map_check(row: PgRow) -> DbResult<AccessCheck> {
    Ok(AccessCheck {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        user_id: row.try_get("user_id")?,
        product_id: row.try_get("product_id")?,
        has_access: row.try_get("has_access")?,
        checked_at: row.try_get("checked_at")?,
        metadata: row.try_get("metadata")?,
    })
}

impl AccessCheckRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        product_id: Option<Uuid>,
        has_access: bool,
        checked_at: DateTime<Utc>,
        metadata: &Value,
    ) -> DbResult<AccessCheck> {
        let row = sqlx::query(
            "INSERT INTO access_checks (org_id, user_id, product_id, has_access, checked_at, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(product_id)
        .bind(has_access)
        .bind(checked_at)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        map_check(row)
    }

    /// Most recent report per user within the window; one row per user
    pub async fn latest_since(
        &self,
        org_id: Uuid,
        since: DateTime<Utc>,
    ) -> DbResult<Vec<AccessCheck>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (user_id) * FROM access_checks \
             WHERE org_id = $1 AND checked_at >= $2 \
             ORDER BY user_id, checked_at DESC",
        )
        .bind(org_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_check).collect()
    }
}
