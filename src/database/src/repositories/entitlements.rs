//! Entitlement repository
//!
//! The state machine in `revback-entitlements` computes transitions; this
//! layer persists them. `apply_transition` is the optimistic-lock write:
//! `WHERE id = $1 AND state = $2` serializes concurrent writers per row, and
//! zero rows affected tells the engine its read went stale.

use crate::error::DbResult;
use crate::repositories::parse_enum;
use chrono::{DateTime, Utc};
use revback_shared::{BillingSource, Entitlement, EntitlementState, StateTransition};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct EntitlementRepository {
    pool: PgPool,
}

/// Field updates carried by a transition
#[derive(Debug, Clone, Default)]
pub struct EntitlementUpdate {
    pub external_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub cancel_at: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub billing_interval: Option<String>,
    pub plan_tier: Option<String>,
}

/// Per-state row counts for the entitlement-health dashboard
#[derive(Debug, Clone, serde::Serialize)]
pub struct StateCounts {
    pub state: String,
    pub count: i64,
}

fn map_entitlement(row: PgRow) -> DbResult<Entitlement> {
    let source: String = row.try_get("source")?;
    let state: String = row.try_get("state")?;
    let history: serde_json::Value = row.try_get("state_history")?;
    let state_history: Vec<StateTransition> = serde_json::from_value(history)
        .map_err(|e| crate::error::DatabaseError::decode("state_history", e))?;
    Ok(Entitlement {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        user_id: row.try_get("user_id")?,
        product_id: row.try_get("product_id")?,
        source: parse_enum("source", &source)?,
        state: parse_enum("state", &state)?,
        external_subscription_id: row.try_get("external_subscription_id")?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at: row.try_get("cancel_at")?,
        trial_end: row.try_get("trial_end")?,
        billing_interval: row.try_get("billing_interval")?,
        plan_tier: row.try_get("plan_tier")?,
        last_event_id: row.try_get("last_event_id")?,
        state_history,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl EntitlementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Ensure an `inactive` row exists for the key, then return the current
    /// row. The ON CONFLICT no-op keeps concurrent upserts convergent (I3).
    pub async fn ensure_exists(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        product_id: Uuid,
        source: BillingSource,
    ) -> DbResult<Entitlement> {
        sqlx::query(
            "INSERT INTO entitlements (org_id, user_id, product_id, source) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (org_id, user_id, product_id, source) DO NOTHING",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(product_id)
        .bind(source.as_str())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT * FROM entitlements \
             WHERE org_id = $1 AND user_id = $2 AND product_id = $3 AND source = $4",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(product_id)
        .bind(source.as_str())
        .fetch_one(&self.pool)
        .await?;
        map_entitlement(row)
    }

    pub async fn find(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        product_id: Uuid,
        source: BillingSource,
    ) -> DbResult<Option<Entitlement>> {
        let row = sqlx::query(
            "SELECT * FROM entitlements \
             WHERE org_id = $1 AND user_id = $2 AND product_id = $3 AND source = $4",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(product_id)
        .bind(source.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_entitlement).transpose()
    }

    pub async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> DbResult<Option<Entitlement>> {
        let row = sqlx::query("SELECT * FROM entitlements WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_entitlement).transpose()
    }

    /// Optimistic-lock persist of one transition. Returns `false` when the
    /// row's state changed under us; the caller does not retry — the queue
    /// redelivery re-reads and re-evaluates.
    pub async fn apply_transition(
        &self,
        entitlement: &Entitlement,
        expected_state: EntitlementState,
        new_state: EntitlementState,
        transition: &StateTransition,
        update: &EntitlementUpdate,
    ) -> DbResult<bool> {
        let mut history = entitlement.state_history.clone();
        history.push(transition.clone());
        let history_json = serde_json::to_value(&history)
            .map_err(|e| crate::error::DatabaseError::decode("state_history", e))?;

        let result = sqlx::query(
            "UPDATE entitlements SET \
               state = $3, \
               state_history = $4, \
               last_event_id = $5, \
               external_subscription_id = COALESCE($6, external_subscription_id), \
               current_period_start = COALESCE($7, current_period_start), \
               current_period_end = COALESCE($8, current_period_end), \
               cancel_at = COALESCE($9, cancel_at), \
               trial_end = COALESCE($10, trial_end), \
               billing_interval = COALESCE($11, billing_interval), \
               plan_tier = COALESCE($12, plan_tier), \
               updated_at = now() \
             WHERE id = $1 AND state = $2",
        )
        .bind(entitlement.id)
        .bind(expected_state.as_str())
        .bind(new_state.as_str())
        .bind(history_json)
        .bind(transition.event_id)
        .bind(&update.external_subscription_id)
        .bind(update.current_period_start)
        .bind(update.current_period_end)
        .bind(update.cancel_at)
        .bind(update.trial_end)
        .bind(&update.billing_interval)
        .bind(&update.plan_tier)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_user(&self, org_id: Uuid, user_id: Uuid) -> DbResult<Vec<Entitlement>> {
        let rows = sqlx::query(
            "SELECT * FROM entitlements WHERE org_id = $1 AND user_id = $2 ORDER BY created_at",
        )
        .bind(org_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_entitlement).collect()
    }

    pub async fn list_by_state(
        &self,
        org_id: Uuid,
        state: EntitlementState,
        limit: i64,
    ) -> DbResult<Vec<Entitlement>> {
        let rows = sqlx::query(
            "SELECT * FROM entitlements WHERE org_id = $1 AND state = $2 \
             ORDER BY updated_at DESC LIMIT $3",
        )
        .bind(org_id)
        .bind(state.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_entitlement).collect()
    }

    /// Active entitlements whose period lapsed inside the window; input to
    /// silent-renewal-failure.
    pub async fn active_lapsed_between(
        &self,
        org_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> DbResult<Vec<Entitlement>> {
        let rows = sqlx::query(
            "SELECT * FROM entitlements \
             WHERE org_id = $1 AND state = 'active' \
               AND current_period_end IS NOT NULL \
               AND current_period_end >= $2 AND current_period_end <= $3",
        )
        .bind(org_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_entitlement).collect()
    }

    /// Entitlements whose trial ended in the past and never reached a live
    /// paid state; input to trial-no-conversion.
    pub async fn trials_ended_unconverted(
        &self,
        org_id: Uuid,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<Entitlement>> {
        let rows = sqlx::query(
            "SELECT * FROM entitlements \
             WHERE org_id = $1 AND trial_end IS NOT NULL AND trial_end < $2 \
               AND state NOT IN ('active')",
        )
        .bind(org_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_entitlement).collect()
    }

    pub async fn counts_by_state(&self, org_id: Uuid) -> DbResult<Vec<StateCounts>> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS count FROM entitlements \
             WHERE org_id = $1 GROUP BY state ORDER BY count DESC",
        )
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(StateCounts {
                    state: r.try_get("state")?,
                    count: r.try_get("count")?,
                })
            })
            .collect()
    }
}
