//! Alert configuration and delivery-log repository

use crate::error::DbResult;
use crate::repositories::parse_enum;
use revback_shared::{AlertChannel, AlertConfiguration, AlertDeliveryLog, IssueSeverity};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct AlertRepository {
    pool: PgPool,
}

fn map_config(row: PgRow) -> DbResult<AlertConfiguration> {
    let channel: String = row.try_get("channel")?;
    let severity: String = row.try_get("severity_filter")?;
    Ok(AlertConfiguration {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        channel: parse_enum("channel", &channel)?,
        enabled: row.try_get("enabled")?,
        target: row.try_get("target")?,
        severity_filter: parse_enum("severity_filter", &severity)?,
        issue_types: row.try_get("issue_types")?,
        signing_secret: row.try_get("signing_secret")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_delivery(row: PgRow) -> DbResult<AlertDeliveryLog> {
    let channel: String = row.try_get("channel")?;
    Ok(AlertDeliveryLog {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        alert_config_id: row.try_get("alert_config_id")?,
        issue_id: row.try_get("issue_id")?,
        channel: parse_enum("channel", &channel)?,
        success: row.try_get("success")?,
        http_status: row.try_get("http_status")?,
        error: row.try_get("error")?,
        attempted_at: row.try_get("attempted_at")?,
    })
}

impl AlertRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_config(
        &self,
        org_id: Uuid,
        channel: AlertChannel,
        target: &str,
        severity_filter: IssueSeverity,
        issue_types: Option<&[String]>,
        signing_secret: Option<&str>,
    ) -> DbResult<AlertConfiguration> {
        let row = sqlx::query(
            "INSERT INTO alert_configurations \
               (org_id, channel, target, severity_filter, issue_types, signing_secret) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(org_id)
        .bind(channel.as_str())
        .bind(target)
        .bind(severity_filter.as_str())
        .bind(issue_types)
        .bind(signing_secret)
        .fetch_one(&self.pool)
        .await?;
        map_config(row)
    }

    pub async fn update_config(
        &self,
        org_id: Uuid,
        id: Uuid,
        enabled: Option<bool>,
        target: Option<&str>,
        severity_filter: Option<IssueSeverity>,
        issue_types: Option<&[String]>,
    ) -> DbResult<Option<AlertConfiguration>> {
        let row = sqlx::query(
            "UPDATE alert_configurations SET \
               enabled = COALESCE($3, enabled), \
               target = COALESCE($4, target), \
               severity_filter = COALESCE($5, severity_filter), \
               issue_types = COALESCE($6, issue_types), \
               updated_at = now() \
             WHERE org_id = $1 AND id = $2 RETURNING *",
        )
        .bind(org_id)
        .bind(id)
        .bind(enabled)
        .bind(target)
        .bind(severity_filter.map(|s| s.as_str()))
        .bind(issue_types)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_config).transpose()
    }

    /// Delete a config together with its delivery history, atomically
    pub async fn delete_config(&self, org_id: Uuid, id: Uuid) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM alert_delivery_logs WHERE org_id = $1 AND alert_config_id = $2",
        )
        .bind(org_id)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        let result = sqlx::query("DELETE FROM alert_configurations WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_config(
        &self,
        org_id: Uuid,
        id: Uuid,
    ) -> DbResult<Option<AlertConfiguration>> {
        let row = sqlx::query("SELECT * FROM alert_configurations WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_config).transpose()
    }

    pub async fn list_configs(&self, org_id: Uuid) -> DbResult<Vec<AlertConfiguration>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_configurations WHERE org_id = $1 ORDER BY created_at",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_config).collect()
    }

    pub async fn list_enabled(&self, org_id: Uuid) -> DbResult<Vec<AlertConfiguration>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_configurations WHERE org_id = $1 AND enabled = true",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_config).collect()
    }

    pub async fn record_delivery(
        &self,
        org_id: Uuid,
        alert_config_id: Uuid,
        issue_id: Uuid,
        channel: AlertChannel,
        success: bool,
        http_status: Option<i32>,
        error: Option<&str>,
    ) -> DbResult<AlertDeliveryLog> {
        let row = sqlx::query(
            "INSERT INTO alert_delivery_logs \
               (org_id, alert_config_id, issue_id, channel, success, http_status, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(org_id)
        .bind(alert_config_id)
        .bind(issue_id)
        .bind(channel.as_str())
        .bind(success)
        .bind(http_status)
        .bind(error)
        .fetch_one(&self.pool)
        .await?;
        map_delivery(row)
    }

    pub async fn list_deliveries(
        &self,
        org_id: Uuid,
        limit: i64,
    ) -> DbResult<Vec<AlertDeliveryLog>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_delivery_logs WHERE org_id = $1 \
             ORDER BY attempted_at DESC LIMIT $2",
        )
        .bind(org_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_delivery).collect()
    }
}
