//! User and user-identity repository
//!
//! Holds the transactional merge used by the identity resolver: when two or
//! more users turn out to be the same person, the oldest survives and every
//! dependent row is re-parented atomically. The merge is idempotent under
//! retry — re-parenting an already re-parented row is a no-op.

use crate::error::DbResult;
use crate::repositories::parse_enum;
use revback_shared::{IdentityHint, User, UserIdentity};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

/// Result of a merge: the surviving user and the removed ids
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub survivor_id: Uuid,
    pub merged_ids: Vec<Uuid>,
}

fn map_user(row: PgRow) -> DbResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        external_user_id: row.try_get("external_user_id")?,
        email: row.try_get("email")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_identity(row: PgRow) -> DbResult<UserIdentity> {
    let source: String = row.try_get("source")?;
    let id_type: String = row.try_get("id_type")?;
    Ok(UserIdentity {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        user_id: row.try_get("user_id")?,
        source: parse_enum("source", &source)?,
        id_type: parse_enum("id_type", &id_type)?,
        external_id: row.try_get("external_id")?,
        created_at: row.try_get("created_at")?,
    })
}

impl UserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, org_id: Uuid, email: Option<&str>) -> DbResult<User> {
        let row = sqlx::query(
            "INSERT INTO users (org_id, email) VALUES ($1, $2) RETURNING *",
        )
        .bind(org_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        map_user(row)
    }

    pub async fn find_by_id(&self, org_id: Uuid, user_id: Uuid) -> DbResult<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_user).transpose()
    }

    pub async fn list(&self, org_id: Uuid, limit: i64, offset: i64) -> DbResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT * FROM users WHERE org_id = $1 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
        )
        .bind(org_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_user).collect()
    }

    pub async fn find_identity(
        &self,
        org_id: Uuid,
        source: &str,
        external_id: &str,
    ) -> DbResult<Option<UserIdentity>> {
        let row = sqlx::query(
            "SELECT * FROM user_identities \
             WHERE org_id = $1 AND source = $2 AND external_id = $3",
        )
        .bind(org_id)
        .bind(source)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_identity).transpose()
    }

    /// Bind a hint to a user; a concurrent identical bind is a no-op
    pub async fn bind_identity(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        hint: &IdentityHint,
    ) -> DbResult<()> {
        sqlx::query(
            "INSERT INTO user_identities (org_id, user_id, source, id_type, external_id) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (org_id, source, external_id) DO NOTHING",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(hint.source.as_str())
        .bind(hint.id_type.as_str())
        .bind(&hint.external_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn identities_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
    ) -> DbResult<Vec<UserIdentity>> {
        let rows = sqlx::query(
            "SELECT * FROM user_identities WHERE org_id = $1 AND user_id = $2 ORDER BY created_at",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_identity).collect()
    }

    /// All identities of one type for a source; drives Apple/Google
    /// backfills, which re-fetch lifecycle state per known identity.
    pub async fn identities_by_type(
        &self,
        org_id: Uuid,
        source: &str,
        id_type: &str,
    ) -> DbResult<Vec<UserIdentity>> {
        let rows = sqlx::query(
            "SELECT * FROM user_identities \
             WHERE org_id = $1 AND source = $2 AND id_type = $3 ORDER BY created_at",
        )
        .bind(org_id)
        .bind(source)
        .bind(id_type)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_identity).collect()
    }

    /// Users holding identities in two or more sources; input to the
    /// cross-platform mismatch detector.
    pub async fn multi_source_user_ids(&self, org_id: Uuid) -> DbResult<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT user_id FROM user_identities WHERE org_id = $1 \
             GROUP BY user_id HAVING COUNT(DISTINCT source) >= 2",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| Ok(r.try_get("user_id")?))
            .collect()
    }

    /// Merge `losers` into `survivor` in one transaction.
    ///
    /// Entitlements that would collide with an existing survivor row on
    /// (org, user, product, source) are dropped rather than re-parented;
    /// the survivor's row is the authoritative one.
    pub async fn merge_users(
        &self,
        org_id: Uuid,
        survivor_id: Uuid,
        loser_ids: &[Uuid],
    ) -> DbResult<MergeOutcome> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE user_identities SET user_id = $1 \
             WHERE org_id = $2 AND user_id = ANY($3)",
        )
        .bind(survivor_id)
        .bind(org_id)
        .bind(loser_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE canonical_events SET user_id = $1 \
             WHERE org_id = $2 AND user_id = ANY($3)",
        )
        .bind(survivor_id)
        .bind(org_id)
        .bind(loser_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE entitlements e SET user_id = $1 \
             WHERE e.org_id = $2 AND e.user_id = ANY($3) \
               AND NOT EXISTS (\
                 SELECT 1 FROM entitlements s \
                 WHERE s.org_id = e.org_id AND s.user_id = $1 \
                   AND s.product_id = e.product_id AND s.source = e.source)",
        )
        .bind(survivor_id)
        .bind(org_id)
        .bind(loser_ids)
        .execute(&mut *tx)
        .await?;

        // colliding loser entitlements lose to the survivor's row
        sqlx::query("DELETE FROM entitlements WHERE org_id = $1 AND user_id = ANY($2)")
            .bind(org_id)
            .bind(loser_ids)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE issues SET user_id = $1 WHERE org_id = $2 AND user_id = ANY($3)",
        )
        .bind(survivor_id)
        .bind(org_id)
        .bind(loser_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE access_checks SET user_id = $1 WHERE org_id = $2 AND user_id = ANY($3)",
        )
        .bind(survivor_id)
        .bind(org_id)
        .bind(loser_ids)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM users WHERE org_id = $1 AND id = ANY($2)")
            .bind(org_id)
            .bind(loser_ids)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(
            org_id = %org_id,
            survivor = %survivor_id,
            merged = loser_ids.len(),
            "users merged"
        );
        Ok(MergeOutcome {
            survivor_id,
            merged_ids: loser_ids.to_vec(),
        })
    }

    /// GDPR deletion: remove the user and everything hanging off them
    pub async fn delete_user_data(&self, org_id: Uuid, user_id: Uuid) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM access_checks WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM issues WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entitlements WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM canonical_events WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM user_identities WHERE org_id = $1 AND user_id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
