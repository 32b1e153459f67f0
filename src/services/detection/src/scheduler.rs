//! Scan and retention scheduling
//!
//! On server start the scheduler enumerates (tenant × scheduled detector)
//! and registers one repeatable job per pair on the scheduled-scans queue,
//! plus the daily data-retention job at 03:00 UTC. Tenants may override a
//! detector's cron via `settings.scan_schedules.<detector_id>`.

use crate::registry::{DetectionResult, DetectorRegistry};
use revback_database::Repositories;
use revback_queue::queue::RepeatDefinition;
use revback_queue::{Queue, RetryPolicy};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

const RETENTION_CRON: &str = "0 3 * * *";
const SCAN_TIMEOUT_MS: u64 = 5 * 60 * 1000;

/// Retry policy for scheduled scans: 3 attempts, 30s base, ×2
fn scan_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        backoff_base_ms: 30_000,
        backoff_multiplier: 2.0,
        backoff_max_ms: 10 * 60 * 1000,
        jitter: true,
    }
}

/// Registers repeatable scan and retention jobs
pub struct ScanScheduler {
    repos: Repositories,
    registry: DetectorRegistry,
    scan_queue: Queue,
    retention_queue: Queue,
}

impl ScanScheduler {
    pub fn new(
        repos: Repositories,
        registry: DetectorRegistry,
        scan_queue: Queue,
        retention_queue: Queue,
    ) -> Self {
        Self {
            repos,
            registry,
            scan_queue,
            retention_queue,
        }
    }

    /// Register everything. Idempotent: re-registering replaces the
    /// existing repeatable definitions.
    pub async fn register_all(&self) -> DetectionResult<usize> {
        let organizations = self.repos.organizations.list_all().await?;
        let mut registered = 0;

        for org in &organizations {
            for detector in self.registry.scheduled() {
                let default_cron = detector.scan_cron().expect("scheduled() filters on this");
                let cron = tenant_override(&org.settings, detector.id())
                    .unwrap_or_else(|| default_cron.to_string());

                let def = RepeatDefinition {
                    repeat_key: scan_repeat_key(org.id, detector.id()),
                    cron,
                    payload: json!({ "org_id": org.id, "detector_id": detector.id() }),
                    retry: scan_retry_policy(),
                    timeout_ms: SCAN_TIMEOUT_MS,
                };
                match self.scan_queue.upsert_repeatable(&def).await {
                    Ok(_) => registered += 1,
                    Err(e) => warn!(
                        org_id = %org.id,
                        detector = detector.id(),
                        error = %e,
                        "failed to register scan schedule"
                    ),
                }
            }
        }

        let retention = RepeatDefinition {
            repeat_key: "retention:daily".to_string(),
            cron: RETENTION_CRON.to_string(),
            payload: json!({ "job": "data_retention" }),
            retry: scan_retry_policy(),
            timeout_ms: 30 * 60 * 1000,
        };
        self.retention_queue.upsert_repeatable(&retention).await?;

        info!(
            organizations = organizations.len(),
            scan_jobs = registered,
            "scan schedules registered"
        );
        Ok(registered)
    }

    /// Register schedules for one tenant (used after org creation)
    pub async fn register_org(&self, org_id: Uuid) -> DetectionResult<usize> {
        let Some(org) = self.repos.organizations.find_by_id(org_id).await? else {
            return Ok(0);
        };
        let mut registered = 0;
        for detector in self.registry.scheduled() {
            let default_cron = detector.scan_cron().expect("scheduled() filters on this");
            let cron = tenant_override(&org.settings, detector.id())
                .unwrap_or_else(|| default_cron.to_string());
            let def = RepeatDefinition {
                repeat_key: scan_repeat_key(org.id, detector.id()),
                cron,
                payload: json!({ "org_id": org.id, "detector_id": detector.id() }),
                retry: scan_retry_policy(),
                timeout_ms: SCAN_TIMEOUT_MS,
            };
            self.scan_queue.upsert_repeatable(&def).await?;
            registered += 1;
        }
        Ok(registered)
    }
}

fn scan_repeat_key(org_id: Uuid, detector_id: &str) -> String {
    format!("scan:{detector_id}:{org_id}")
}

/// Tenant cron override from `settings.scan_schedules.<detector_id>`
fn tenant_override(settings: &serde_json::Value, detector_id: &str) -> Option<String> {
    settings["scan_schedules"][detector_id]
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scan_retry_policy_matches_operational_contract() {
        let policy = scan_retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_base_ms, 30_000);
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn tenant_override_reads_settings_path() {
        let settings = json!({
            "scan_schedules": { "webhook_delivery_gap": "*/10 * * * *" }
        });
        assert_eq!(
            tenant_override(&settings, "webhook_delivery_gap").as_deref(),
            Some("*/10 * * * *")
        );
        assert_eq!(tenant_override(&settings, "trial_no_conversion"), None);
        assert_eq!(tenant_override(&json!({}), "webhook_delivery_gap"), None);
    }

    #[test]
    fn repeat_keys_are_scoped_per_tenant_and_detector() {
        let org = Uuid::new_v4();
        let key = scan_repeat_key(org, "refund_not_revoked");
        assert!(key.starts_with("scan:refund_not_revoked:"));
        assert!(key.ends_with(&org.to_string()));
    }
}
