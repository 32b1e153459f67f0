//! Data retention sweeps
//!
//! Driven by the daily data-retention job: webhook logs older than 90 days
//! are deleted and raw payloads on canonical events older than two years
//! are nulled, in batches of 1000 until each sweep runs dry.

use crate::registry::DetectionResult;
use chrono::{Duration, Utc};
use revback_database::Repositories;
use tracing::info;

const WEBHOOK_LOG_RETENTION_DAYS: i64 = 90;
const RAW_PAYLOAD_RETENTION_DAYS: i64 = 365 * 2;
const BATCH_SIZE: i64 = 1000;

/// Outcome of one retention run
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RetentionReport {
    pub webhook_logs_deleted: u64,
    pub payloads_redacted: u64,
}

/// Run both sweeps to completion
pub async fn run_retention(repos: &Repositories) -> DetectionResult<RetentionReport> {
    let now = Utc::now();
    let mut report = RetentionReport::default();

    let log_cutoff = now - Duration::days(WEBHOOK_LOG_RETENTION_DAYS);
    loop {
        let deleted = repos.webhook_logs.delete_before(log_cutoff, BATCH_SIZE).await?;
        report.webhook_logs_deleted += deleted;
        if deleted < BATCH_SIZE as u64 {
            break;
        }
    }

    let payload_cutoff = now - Duration::days(RAW_PAYLOAD_RETENTION_DAYS);
    loop {
        let redacted = repos
            .events
            .redact_raw_payloads_before(payload_cutoff, BATCH_SIZE)
            .await?;
        report.payloads_redacted += redacted;
        if redacted < BATCH_SIZE as u64 {
            break;
        }
    }

    info!(
        webhook_logs_deleted = report.webhook_logs_deleted,
        payloads_redacted = report.payloads_redacted,
        "retention sweep completed"
    );
    Ok(report)
}
