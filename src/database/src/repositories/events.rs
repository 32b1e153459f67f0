//! Canonical event repository
//!
//! Inserts go through `insert_idempotent`, whose `ON CONFLICT
//! (idempotency_key) DO NOTHING` is the single mechanism that makes webhook
//! replays and backfill/webhook races safe.

use crate::error::DbResult;
use crate::repositories::parse_enum;
use chrono::{DateTime, Utc};
use revback_shared::{
    BillingSource, CanonicalEvent, EventType, IngestSource, NormalizedEvent,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct EventRepository {
    pool: PgPool,
}

/// Resolution results attached to a normalized event before insert
#[derive(Debug, Clone)]
pub struct NewCanonicalEvent<'a> {
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub ingest_source: IngestSource,
    pub event: &'a NormalizedEvent,
}

/// Aggregate used by the revenue-impact dashboard
#[derive(Debug, Clone, serde::Serialize)]
pub struct RevenueByType {
    pub event_type: String,
    pub total_cents: i64,
    pub count: i64,
}

fn map_event(row: PgRow) -> DbResult<CanonicalEvent> {
    let source: String = row.try_get("source")?;
    let event_type: String = row.try_get("event_type")?;
    let status: String = row.try_get("status")?;
    let environment: String = row.try_get("environment")?;
    let ingest_source: String = row.try_get("ingest_source")?;
    Ok(CanonicalEvent {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        user_id: row.try_get("user_id")?,
        product_id: row.try_get("product_id")?,
        source: parse_enum("source", &source)?,
        event_type: parse_enum("event_type", &event_type)?,
        source_event_type: row.try_get("source_event_type")?,
        status: parse_enum("status", &status)?,
        event_time: row.try_get("event_time")?,
        idempotency_key: row.try_get("idempotency_key")?,
        ingest_source: parse_enum("ingest_source", &ingest_source)?,
        amount_cents: row.try_get("amount_cents")?,
        currency: row.try_get("currency")?,
        proceeds_cents: row.try_get("proceeds_cents")?,
        external_event_id: row.try_get("external_event_id")?,
        external_subscription_id: row.try_get("external_subscription_id")?,
        original_transaction_id: row.try_get("original_transaction_id")?,
        subscription_group_id: row.try_get("subscription_group_id")?,
        period_type: row.try_get("period_type")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
        expiration_time: row.try_get("expiration_time")?,
        grace_period_expiration: row.try_get("grace_period_expiration")?,
        cancellation_reason: row.try_get("cancellation_reason")?,
        billing_interval: row.try_get("billing_interval")?,
        plan_tier: row.try_get("plan_tier")?,
        trial_started_at: row.try_get("trial_started_at")?,
        environment: parse_enum("environment", &environment)?,
        country_code: row.try_get("country_code")?,
        raw_payload: row.try_get("raw_payload")?,
        ingested_at: row.try_get("ingested_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

impl EventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Idempotent insert. Returns `None` when the idempotency key already
    /// exists — the caller records the duplicate and moves on.
    pub async fn insert_idempotent(
        &self,
        new: NewCanonicalEvent<'_>,
    ) -> DbResult<Option<CanonicalEvent>> {
        let e = new.event;
        let row = sqlx::query(
            "INSERT INTO canonical_events (\
               org_id, user_id, product_id, source, event_type, source_event_type, \
               status, event_time, idempotency_key, ingest_source, amount_cents, currency, \
               proceeds_cents, external_event_id, external_subscription_id, \
               original_transaction_id, subscription_group_id, period_type, period_start, \
               period_end, expiration_time, grace_period_expiration, cancellation_reason, \
               billing_interval, plan_tier, trial_started_at, environment, country_code, \
               raw_payload) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,\
               $20,$21,$22,$23,$24,$25,$26,$27,$28,$29) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING *",
        )
        .bind(new.org_id)
        .bind(new.user_id)
        .bind(new.product_id)
        .bind(e.source.as_str())
        .bind(e.event_type.as_str())
        .bind(&e.source_event_type)
        .bind(e.status.as_str())
        .bind(e.event_time)
        .bind(&e.idempotency_key)
        .bind(new.ingest_source.as_str())
        .bind(e.amount_cents)
        .bind(&e.currency)
        .bind(e.proceeds_cents)
        .bind(&e.external_event_id)
        .bind(&e.external_subscription_id)
        .bind(&e.original_transaction_id)
        .bind(&e.subscription_group_id)
        .bind(e.period_type.map(|p| p.as_str()))
        .bind(e.period_start)
        .bind(e.period_end)
        .bind(e.expiration_time)
        .bind(e.grace_period_expiration)
        .bind(&e.cancellation_reason)
        .bind(&e.billing_interval)
        .bind(&e.plan_tier)
        .bind(e.trial_started_at)
        .bind(e.environment.as_str())
        .bind(&e.country_code)
        .bind(&e.raw_payload)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_event).transpose()
    }

    pub async fn find_by_id(&self, org_id: Uuid, id: Uuid) -> DbResult<Option<CanonicalEvent>> {
        let row = sqlx::query("SELECT * FROM canonical_events WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(map_event).transpose()
    }

    pub async fn set_processed(&self, org_id: Uuid, id: Uuid) -> DbResult<()> {
        sqlx::query(
            "UPDATE canonical_events SET processed_at = now() WHERE org_id = $1 AND id = $2",
        )
        .bind(org_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Timeline for the user detail endpoint, newest first
    pub async fn list_for_user(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        limit: i64,
    ) -> DbResult<Vec<CanonicalEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM canonical_events WHERE org_id = $1 AND user_id = $2 \
             ORDER BY event_time DESC LIMIT $3",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_event).collect()
    }

    /// Whether a successful payment event exists for (user, product) at or
    /// after `since`. Used by entitlement-without-payment.
    pub async fn has_payment_since(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        product_id: Uuid,
        since: DateTime<Utc>,
    ) -> DbResult<bool> {
        let row = sqlx::query(
            "SELECT 1 AS hit FROM canonical_events \
             WHERE org_id = $1 AND user_id = $2 AND product_id = $3 \
               AND event_type IN ('purchase', 'renewal', 'trial_conversion') \
               AND status = 'success' AND event_time >= $4 \
             LIMIT 1",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(product_id)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Most recent successful payment event for (user, product)
    pub async fn last_payment(
        &self,
        org_id: Uuid,
        user_id: Uuid,
        product_id: Uuid,
    ) -> DbResult<Option<CanonicalEvent>> {
        let row = sqlx::query(
            "SELECT * FROM canonical_events \
             WHERE org_id = $1 AND user_id = $2 AND product_id = $3 \
               AND event_type IN ('purchase', 'renewal', 'trial_conversion') \
               AND status = 'success' \
             ORDER BY event_time DESC LIMIT 1",
        )
        .bind(org_id)
        .bind(user_id)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(map_event).transpose()
    }

    /// Refund events older than `cutoff`; input to refund-not-revoked
    pub async fn refunds_before(
        &self,
        org_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<CanonicalEvent>> {
        let rows = sqlx::query(
            "SELECT * FROM canonical_events \
             WHERE org_id = $1 AND event_type = 'refund' AND event_time <= $2 \
               AND user_id IS NOT NULL AND product_id IS NOT NULL \
             ORDER BY event_time DESC LIMIT $3",
        )
        .bind(org_id)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(map_event).collect()
    }

    /// Whether any of `types` arrived for the subscription after `since`.
    /// Used by silent-renewal-failure to rule out an explained lapse.
    pub async fn has_event_for_subscription_since(
        &self,
        org_id: Uuid,
        external_subscription_id: &str,
        types: &[EventType],
        since: DateTime<Utc>,
    ) -> DbResult<bool> {
        let type_strings: Vec<&str> = types.iter().map(EventType::as_str).collect();
        let row = sqlx::query(
            "SELECT 1 AS hit FROM canonical_events \
             WHERE org_id = $1 AND external_subscription_id = $2 \
               AND event_type = ANY($3) AND event_time >= $4 \
             LIMIT 1",
        )
        .bind(org_id)
        .bind(external_subscription_id)
        .bind(&type_strings)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn count_for_org(&self, org_id: Uuid) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM canonical_events WHERE org_id = $1")
            .bind(org_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    pub async fn count_by_source(
        &self,
        org_id: Uuid,
        source: BillingSource,
    ) -> DbResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM canonical_events WHERE org_id = $1 AND source = $2",
        )
        .bind(org_id)
        .bind(source.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("n")?)
    }

    /// Amount sums grouped by event type since `since`
    pub async fn revenue_by_type(
        &self,
        org_id: Uuid,
        since: DateTime<Utc>,
    ) -> DbResult<Vec<RevenueByType>> {
        let rows = sqlx::query(
            "SELECT event_type, COALESCE(SUM(amount_cents), 0) AS total_cents, COUNT(*) AS count \
             FROM canonical_events \
             WHERE org_id = $1 AND event_time >= $2 AND amount_cents IS NOT NULL \
             GROUP BY event_type ORDER BY total_cents DESC",
        )
        .bind(org_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                Ok(RevenueByType {
                    event_type: r.try_get("event_type")?,
                    total_cents: r.try_get("total_cents")?,
                    count: r.try_get("count")?,
                })
            })
            .collect()
    }

    /// Retention sweep: null raw payloads older than `cutoff`, one batch.
    /// Deployment-wide maintenance, driven by the data-retention queue.
    pub async fn redact_raw_payloads_before(
        &self,
        cutoff: DateTime<Utc>,
        batch: i64,
    ) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE canonical_events SET raw_payload = NULL \
             WHERE id IN (\
               SELECT id FROM canonical_events \
               WHERE ingested_at < $1 AND raw_payload IS NOT NULL \
               LIMIT $2)",
        )
        .bind(cutoff)
        .bind(batch)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
