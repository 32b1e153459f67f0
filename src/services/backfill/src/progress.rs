//! Backfill progress in the shared KV store
//!
//! One JSON object per (source, org), keyed `backfill:<source>:<org_id>`,
//! read by the onboarding status endpoint while the import runs.

use crate::error::BackfillResult;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use revback_shared::{BackfillProgress, BackfillStatus, BillingSource};
use uuid::Uuid;

const PROGRESS_TTL_SECONDS: i64 = 7 * 24 * 3600;

#[derive(Clone)]
pub struct ProgressStore {
    conn: ConnectionManager,
}

impl ProgressStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    fn key(source: BillingSource, org_id: Uuid) -> String {
        format!("backfill:{}:{}", source.as_str(), org_id)
    }

    pub async fn read(
        &self,
        source: BillingSource,
        org_id: Uuid,
    ) -> BackfillResult<Option<BackfillProgress>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(Self::key(source, org_id)).await?;
        Ok(raw.map(|r| serde_json::from_str(&r)).transpose()?)
    }

    pub async fn write(
        &self,
        source: BillingSource,
        org_id: Uuid,
        progress: &BackfillProgress,
    ) -> BackfillResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            Self::key(source, org_id),
            serde_json::to_string(progress)?,
            PROGRESS_TTL_SECONDS as u64,
        )
        .await?;
        Ok(())
    }

    /// Read-modify-write helper for incremental updates
    pub async fn update<F>(
        &self,
        source: BillingSource,
        org_id: Uuid,
        mutate: F,
    ) -> BackfillResult<BackfillProgress>
    where
        F: FnOnce(&mut BackfillProgress),
    {
        let mut progress = self
            .read(source, org_id)
            .await?
            .unwrap_or_else(|| BackfillProgress::started(Utc::now()));
        mutate(&mut progress);
        self.write(source, org_id, &progress).await?;
        Ok(progress)
    }

    /// Mark a run finished, recording its duration
    pub async fn finish(
        &self,
        source: BillingSource,
        org_id: Uuid,
        status: BackfillStatus,
    ) -> BackfillResult<()> {
        self.update(source, org_id, |p| {
            p.status = status;
            p.duration_ms = Some((Utc::now() - p.started_at).num_milliseconds().max(0) as u64);
        })
        .await?;
        Ok(())
    }
}
