//! Append-only audit log repository

use crate::error::DbResult;
use revback_shared::AuditLogEntry;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

fn map_entry(row: PgRow) -> DbResult<AuditLogEntry> {
    Ok(AuditLogEntry {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        actor_type: row.try_get("actor_type")?,
        actor_id: row.try_get("actor_id")?,
        action: row.try_get("action")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append one entry. There is no update or delete on this table.
    #[allow(clippy::too_many_arguments)]
    pub async fn append(
        &self,
        org_id: Uuid,
        actor_type: &str,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<String>,
        metadata: Value,
    ) -> DbResult<AuditLogEntry> {
        let row = sqlx::query(
            "INSERT INTO audit_logs \
               (org_id, actor_type, actor_id, action, resource_type, resource_id, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(org_id)
        .bind(actor_type)
        .bind(actor_id)
        .bind(action)
        .bind(resource_type)
        .bind(resource_id)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        map_entry(row)
    }

    pub async fn list(&self, org_id: Uuid, limit: i64) -> DbResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM audit_logs WHERE org_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_entry).collect()
    }
}
