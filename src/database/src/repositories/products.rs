//! Product repository
//!
//! Products are auto-created the first time an event references an unknown
//! external product id, keeping onboarding friction-free. The auto-created
//! name is the external id itself; operators rename later.

use crate::error::DbResult;
use revback_shared::{BillingSource, Product};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct ProductRepository {
    pool: PgPool,
}

fn map_product(row: PgRow) -> DbResult<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        external_ids: row.try_get("external_ids")?,
        active: row.try_get("active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> DbResult<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_product).transpose()
    }

    pub async fn find_by_external_id(
        &self,
        org_id: Uuid,
        source: BillingSource,
        external_id: &str,
    ) -> DbResult<Option<Product>> {
        let row = sqlx::query(
            "SELECT * FROM products WHERE org_id = $1 AND external_ids->>$2 = $3",
        )
        .bind(org_id)
        .bind(source.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_product).transpose()
    }

    /// Find or auto-create the product for a provider product id. Concurrent
    /// calls converge on one row via the (org_id, name) conflict target.
    pub async fn resolve_external(
        &self,
        org_id: Uuid,
        source: BillingSource,
        external_id: &str,
    ) -> DbResult<Product> {
        if let Some(existing) = self.find_by_external_id(org_id, source, external_id).await? {
            return Ok(existing);
        }
        let external_ids = json!({ source.as_str(): external_id });
        let row = sqlx::query(
            "INSERT INTO products (org_id, name, external_ids) VALUES ($1, $2, $3) \
             ON CONFLICT (org_id, name) DO UPDATE SET \
               external_ids = products.external_ids || EXCLUDED.external_ids, \
               updated_at = now() \
             RETURNING *",
        )
        .bind(org_id)
        .bind(external_id)
        .bind(external_ids)
        .fetch_one(&self.pool)
        .await?;
        map_product(row)
    }

    pub async fn list(&self, org_id: Uuid) -> DbResult<Vec<Product>> {
        let rows = sqlx::query("SELECT * FROM products WHERE org_id = $1 ORDER BY created_at")
            .bind(org_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(map_product).collect()
    }
}
