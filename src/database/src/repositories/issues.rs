//! Issue repository
//!
//! The detection engine de-duplicates to one open issue per
//! (org, issue_type, user); `find_open` plus `refresh` implement that
//! policy, `insert` creates the row when nothing open matches.

use crate::error::DbResult;
use crate::repositories::parse_enum;
use chrono::Utc;
use revback_shared::{DetectedIssue, Issue, IssueSeverity, IssueStatus};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct IssueRepository {
    pool: PgPool,
}

/// Listing filter for the issues API
#[derive(Debug, Clone, Default)]
pub struct IssueFilter {
    pub status: Option<IssueStatus>,
    pub severity: Option<IssueSeverity>,
    pub issue_type: Option<String>,
    pub user_id: Option<Uuid>,
    pub limit: i64,
    pub offset: i64,
}

/// Aggregates for the revenue-impact dashboard
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpenIssueTotals {
    pub open_count: i64,
    pub critical_count: i64,
    pub estimated_revenue_cents: i64,
}

fn map_issue(row: PgRow) -> DbResult<Issue> {
    let severity: String = row.try_get("severity")?;
    let status: String = row.try_get("status")?;
    let tier: String = row.try_get("detection_tier")?;
    Ok(Issue {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        user_id: row.try_get("user_id")?,
        issue_type: row.try_get("issue_type")?,
        severity: parse_enum("severity", &severity)?,
        status: parse_enum("status", &status)?,
        confidence: row.try_get("confidence")?,
        estimated_revenue_cents: row.try_get("estimated_revenue_cents")?,
        detector_id: row.try_get("detector_id")?,
        detection_tier: parse_enum("detection_tier", &tier)?,
        evidence: row.try_get("evidence")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        resolution: row.try_get("resolution")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

impl IssueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The open issue for (org, type, user), if one exists
    pub async fn find_open(
        &self,
        org_id: Uuid,
        issue_type: &str,
        user_id: Option<Uuid>,
    ) -> DbResult<Option<Issue>> {
        let row = sqlx::query(
            "SELECT * FROM issues \
             WHERE org_id = $1 AND issue_type = $2 \
               AND user_id IS NOT DISTINCT FROM $3 AND status = 'open' \
             LIMIT 1",
        )
        .bind(org_id)
        .bind(issue_type)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_issue).transpose()
    }

    pub async fn insert(
        &self,
        org_id: Uuid,
        detector_id: &str,
        detected: &DetectedIssue,
    ) -> DbResult<Issue> {
        let row = sqlx::query(
            "INSERT INTO issues (\
               org_id, user_id, issue_type, severity, confidence, \
               estimated_revenue_cents, detector_id, detection_tier, evidence, \
               title, description) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11) RETURNING *",
        )
        .bind(org_id)
        .bind(detected.user_id)
        .bind(&detected.issue_type)
        .bind(detected.severity.as_str())
        .bind(detected.confidence)
        .bind(detected.estimated_revenue_cents)
        .bind(detector_id)
        .bind(detected.detection_tier.as_str())
        .bind(&detected.evidence)
        .bind(&detected.title)
        .bind(&detected.description)
        .fetch_one(&self.pool)
        .await?;
        map_issue(row)
    }

    /// Refresh an existing open issue on re-detection: bump `updated_at`,
    /// merge evidence, and raise severity/revenue if the new detection is
    /// stronger.
    pub async fn refresh(
        &self,
        org_id: Uuid,
        issue_id: Uuid,
        detected: &DetectedIssue,
    ) -> DbResult<()> {
        sqlx::query(
            "UPDATE issues SET \
               evidence = evidence || $3, \
               severity = CASE \
                 WHEN $4 = 'critical' THEN 'critical' \
                 WHEN $4 = 'warning' AND severity = 'info' THEN 'warning' \
                 ELSE severity END, \
               estimated_revenue_cents = GREATEST(\
                 COALESCE(estimated_revenue_cents, 0), COALESCE($5, 0)), \
               confidence = GREATEST(confidence, $6), \
               updated_at = now() \
             WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(issue_id)
        .bind(&detected.evidence)
        .bind(detected.severity.as_str())
        .bind(detected.estimated_revenue_cents)
        .bind(detected.confidence)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> DbResult<Option<Issue>> {
        let row = sqlx::query("SELECT * FROM issues WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_issue).transpose()
    }

    pub async fn list(&self, org_id: Uuid, filter: &IssueFilter) -> DbResult<Vec<Issue>> {
        let rows = sqlx::query(
            "SELECT * FROM issues WHERE org_id = $1 \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::text IS NULL OR severity = $3) \
               AND ($4::text IS NULL OR issue_type = $4) \
               AND ($5::uuid IS NULL OR user_id = $5) \
             ORDER BY created_at DESC LIMIT $6 OFFSET $7",
        )
        .bind(org_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.severity.map(|s| s.as_str()))
        .bind(&filter.issue_type)
        .bind(filter.user_id)
        .bind(if filter.limit > 0 { filter.limit } else { 50 })
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_issue).collect()
    }

    pub async fn list_for_user(&self, org_id: Uuid, user_id: Uuid) -> DbResult<Vec<Issue>> {
        let rows = sqlx::query(
            "SELECT * FROM issues WHERE org_id = $1 AND user_id = $2 ORDER BY created_at DESC",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_issue).collect()
    }

    /// Operator status change. Resolution metadata is recorded verbatim.
    pub async fn update_status(
        &self,
        org_id: Uuid,
        issue_id: Uuid,
        status: IssueStatus,
        resolution: Option<Value>,
    ) -> DbResult<Option<Issue>> {
        let resolved_at = match status {
            IssueStatus::Resolved | IssueStatus::Dismissed => Some(Utc::now()),
            _ => None,
        };
        let row = sqlx::query(
            "UPDATE issues SET status = $3, resolution = COALESCE($4, resolution), \
               resolved_at = COALESCE($5, resolved_at), updated_at = now() \
             WHERE org_id = $1 AND id = $2 RETURNING *",
        )
        .bind(org_id)
        .bind(issue_id)
        .bind(status.as_str())
        .bind(resolution)
        .bind(resolved_at)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_issue).transpose()
    }

    pub async fn open_totals(&self, org_id: Uuid) -> DbResult<OpenIssueTotals> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS open_count, \
               COUNT(*) FILTER (WHERE severity = 'critical') AS critical_count, \
               COALESCE(SUM(estimated_revenue_cents), 0) AS estimated_revenue_cents \
             FROM issues WHERE org_id = $1 AND status = 'open'",
        )
        .bind(org_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(OpenIssueTotals {
            open_count: row.try_get("open_count")?,
            critical_count: row.try_get("critical_count")?,
            estimated_revenue_cents: row.try_get("estimated_revenue_cents")?,
        })
    }
}
