//! Billing connection repository
//!
//! The `credentials` column is ciphertext produced by
//! `revback_security::CredentialCipher`; this layer never sees plaintext.

use crate::error::DbResult;
use crate::repositories::parse_enum;
use chrono::{DateTime, Utc};
use revback_shared::{BillingConnection, BillingSource, SyncStatus};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct BillingConnectionRepository {
    pool: PgPool,
}

fn map_connection(row: PgRow) -> DbResult<BillingConnection> {
    let source: String = row.try_get("source")?;
    let sync_status: String = row.try_get("sync_status")?;
    Ok(BillingConnection {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        source: parse_enum("source", &source)?,
        credentials: row.try_get("credentials")?,
        webhook_secret: row.try_get("webhook_secret")?,
        active: row.try_get("active")?,
        last_webhook_at: row.try_get("last_webhook_at")?,
        last_sync_at: row.try_get("last_sync_at")?,
        sync_status: parse_enum("sync_status", &sync_status)?,
        original_notification_url: row.try_get("original_notification_url")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl BillingConnectionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the connection for (org, source)
    pub async fn upsert(
        &self,
        org_id: Uuid,
        source: BillingSource,
        credentials: &str,
        webhook_secret: Option<&str>,
        original_notification_url: Option<&str>,
    ) -> DbResult<BillingConnection> {
        let row = sqlx::query(
            "INSERT INTO billing_connections \
               (org_id, source, credentials, webhook_secret, original_notification_url) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (org_id, source) DO UPDATE SET \
               credentials = EXCLUDED.credentials, \
               webhook_secret = EXCLUDED.webhook_secret, \
               original_notification_url = EXCLUDED.original_notification_url, \
               active = true, \
               updated_at = now() \
             RETURNING *",
        )
        .bind(org_id)
        .bind(source.as_str())
        .bind(credentials)
        .bind(webhook_secret)
        .bind(original_notification_url)
        .fetch_one(&self.pool)
        .await?;
        map_connection(row)
    }

    pub async fn find(
        &self,
        org_id: Uuid,
        source: BillingSource,
    ) -> DbResult<Option<BillingConnection>> {
        let row = sqlx::query(
            "SELECT * FROM billing_connections WHERE org_id = $1 AND source = $2",
        )
        .bind(org_id)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_connection).transpose()
    }

    pub async fn list_for_org(&self, org_id: Uuid) -> DbResult<Vec<BillingConnection>> {
        let rows = sqlx::query(
            "SELECT * FROM billing_connections WHERE org_id = $1 ORDER BY source",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_connection).collect()
    }

    /// Fire-and-forget freshness marker used by the webhook receiver
    pub async fn touch_last_webhook(&self, org_id: Uuid, source: BillingSource) -> DbResult<()> {
        sqlx::query(
            "UPDATE billing_connections SET last_webhook_at = now(), updated_at = now() \
             WHERE org_id = $1 AND source = $2",
        )
        .bind(org_id)
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_sync_status(
        &self,
        org_id: Uuid,
        source: BillingSource,
        status: SyncStatus,
        last_sync_at: Option<DateTime<Utc>>,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE billing_connections SET sync_status = $3, last_sync_at = COALESCE($4, last_sync_at), \
             updated_at = now() WHERE org_id = $1 AND source = $2",
        )
        .bind(org_id)
        .bind(source.as_str())
        .bind(status.as_str())
        .bind(last_sync_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_active(
        &self,
        org_id: Uuid,
        source: BillingSource,
        active: bool,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE billing_connections SET active = $3, updated_at = now() \
             WHERE org_id = $1 AND source = $2",
        )
        .bind(org_id)
        .bind(source.as_str())
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
