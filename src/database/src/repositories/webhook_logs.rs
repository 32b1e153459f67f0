//! Webhook log repository
//!
//! One row per inbound provider webhook (I7: if the provider got a 200, the
//! raw body and headers are here). Raw bodies are deleted by the 90-day
//! retention sweep.

use crate::error::DbResult;
use crate::repositories::parse_enum;
use chrono::{DateTime, Utc};
use revback_shared::{BillingSource, ProcessingStatus, WebhookLog};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct WebhookLogRepository {
    pool: PgPool,
}

fn map_log(row: PgRow) -> DbResult<WebhookLog> {
    let source: String = row.try_get("source")?;
    let status: String = row.try_get("processing_status")?;
    Ok(WebhookLog {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        source: parse_enum("source", &source)?,
        external_event_id: row.try_get("external_event_id")?,
        processing_status: parse_enum("processing_status", &status)?,
        http_status: row.try_get("http_status")?,
        error: row.try_get("error")?,
        headers: row.try_get("headers")?,
        body: row.try_get("body")?,
        received_at: row.try_get("received_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

impl WebhookLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        org_id: Uuid,
        source: BillingSource,
        status: ProcessingStatus,
        headers: Option<&Value>,
        body: Option<&str>,
        external_event_id: Option<&str>,
    ) -> DbResult<WebhookLog> {
        let row = sqlx::query(
            "INSERT INTO webhook_logs \
               (org_id, source, processing_status, headers, body, external_event_id) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(org_id)
        .bind(source.as_str())
        .bind(status.as_str())
        .bind(headers)
        .bind(body)
        .bind(external_event_id)
        .fetch_one(&self.pool)
        .await?;
        map_log(row)
    }

    pub async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> DbResult<Option<WebhookLog>> {
        let row = sqlx::query("SELECT * FROM webhook_logs WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_log).transpose()
    }

    pub async fn set_status(
        &self,
        org_id: Uuid,
        id: Uuid,
        status: ProcessingStatus,
        error: Option<&str>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE webhook_logs SET processing_status = $3, error = $4, \
               processed_at = CASE WHEN $3 IN ('processed','skipped','failed') \
                 THEN now() ELSE processed_at END \
             WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Proxy forwarding outcome (Apple webhook proxy)
    pub async fn set_http_status(&self, org_id: Uuid, id: Uuid, code: i32) -> DbResult<()> {
        sqlx::query(
            "UPDATE webhook_logs SET http_status = $3 WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_since(
        &self,
        org_id: Uuid,
        since: DateTime<Utc>,
    ) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM webhook_logs WHERE org_id = $1 AND received_at >= $2",
        )
        .bind(org_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Retention sweep: delete rows older than `cutoff`, one batch.
    /// Deployment-wide maintenance, driven by the data-retention queue.
    pub async fn delete_before(&self, cutoff: DateTime<Utc>, batch: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM webhook_logs WHERE id IN (\
               SELECT id FROM webhook_logs WHERE received_at < $1 LIMIT $2)",
        )
        .bind(cutoff)
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
