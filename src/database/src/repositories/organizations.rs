//! Organization (tenant root) repository

use crate::error::DbResult;
use revback_shared::Organization;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct OrganizationRepository {
    pool: PgPool,
}

fn map_org(row: PgRow) -> DbResult<Organization> {
    Ok(Organization {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        settings: row.try_get("settings")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl OrganizationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, slug: &str, name: &str) -> DbResult<Organization> {
        let row = sqlx::query(
            "INSERT INTO organizations (slug, name) VALUES ($1, $2) RETURNING *",
        )
        .bind(slug)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        map_org(row)
    }

    pub async fn find_by_slug(&self, slug: &str) -> DbResult<Option<Organization>> {
        let row = sqlx::query("SELECT * FROM organizations WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_org).transpose()
    }

    pub async fn find_by_id(&self, org_id: Uuid) -> DbResult<Option<Organization>> {
        let row = sqlx::query("SELECT * FROM organizations WHERE id = $1")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_org).transpose()
    }

    /// Every tenant; used by the scheduler to register scan jobs
    pub async fn list_all(&self) -> DbResult<Vec<Organization>> {
        let rows = sqlx::query("SELECT * FROM organizations ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(map_org).collect()
    }

    pub async fn update_settings(&self, org_id: Uuid, settings: &Value) -> DbResult<()> {
        sqlx::query("UPDATE organizations SET settings = $2, updated_at = now() WHERE id = $1")
            .bind(org_id)
            .bind(settings)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
