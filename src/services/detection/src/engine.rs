//! Detection engine
//!
//! Runs detectors and persists their findings. De-duplication policy: one
//! open issue per (org, issue type, user) — a re-detection refreshes the
//! existing row and merges evidence instead of piling up duplicates.
//! Creating a new issue enqueues an alert-dispatch job as a side effect.
//!
//! A detector that fails is logged and skipped; it never aborts the other
//! detectors or the pipeline.

use crate::registry::{DetectionError, DetectionResult, DetectorRegistry};
use revback_database::Repositories;
use revback_queue::{Job, Queue};
use revback_shared::{CanonicalEvent, DetectedIssue, Issue};
use serde_json::json;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Runs detectors and persists issues
#[derive(Clone)]
pub struct DetectionEngine {
    repos: Repositories,
    registry: DetectorRegistry,
    alert_queue: Queue,
}

impl DetectionEngine {
    pub fn new(repos: Repositories, registry: DetectorRegistry, alert_queue: Queue) -> Self {
        Self {
            repos,
            registry,
            alert_queue,
        }
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.registry
    }

    /// Run every detector's event check against one stored event. Detector
    /// failures are contained; returns the issues actually persisted.
    pub async fn run_event_checks(
        &self,
        org_id: Uuid,
        event: &CanonicalEvent,
    ) -> DetectionResult<Vec<Issue>> {
        let mut persisted = Vec::new();
        for detector in self.registry.all() {
            let found = match detector.check_event(&self.repos, org_id, event).await {
                Ok(found) => found,
                Err(e) => {
                    error!(
                        detector = detector.id(),
                        org_id = %org_id,
                        event_id = %event.id,
                        error = %e,
                        "detector check failed, skipping"
                    );
                    continue;
                }
            };
            for issue in found {
                if let Some(stored) = self.persist(org_id, detector.id(), &issue).await? {
                    persisted.push(stored);
                }
            }
        }
        Ok(persisted)
    }

    /// Run one detector's scheduled scan for a tenant
    pub async fn run_scan(&self, org_id: Uuid, detector_id: &str) -> DetectionResult<Vec<Issue>> {
        let detector = self
            .registry
            .get(detector_id)
            .ok_or_else(|| DetectionError::UnknownDetector(detector_id.to_string()))?;

        let found = detector.scheduled_scan(&self.repos, org_id).await?;
        debug!(
            detector = detector_id,
            org_id = %org_id,
            findings = found.len(),
            "scheduled scan completed"
        );

        let mut persisted = Vec::new();
        for issue in found {
            if let Some(stored) = self.persist(org_id, detector_id, &issue).await? {
                persisted.push(stored);
            }
        }
        Ok(persisted)
    }

    /// Persist one finding. Returns the newly created issue, or `None` when
    /// it collapsed into an existing open row.
    async fn persist(
        &self,
        org_id: Uuid,
        detector_id: &str,
        detected: &DetectedIssue,
    ) -> DetectionResult<Option<Issue>> {
        if let Some(existing) = self
            .repos
            .issues
            .find_open(org_id, &detected.issue_type, detected.user_id)
            .await?
        {
            self.repos
                .issues
                .refresh(org_id, existing.id, detected)
                .await?;
            debug!(
                org_id = %org_id,
                issue_id = %existing.id,
                issue_type = %detected.issue_type,
                "re-detection merged into open issue"
            );
            return Ok(None);
        }

        let issue = self.repos.issues.insert(org_id, detector_id, detected).await?;
        info!(
            org_id = %org_id,
            issue_id = %issue.id,
            issue_type = %issue.issue_type,
            severity = %issue.severity,
            "issue created"
        );

        let job = Job::new(
            revback_shared::queues::ALERT_DISPATCH,
            json!({ "org_id": org_id, "issue_id": issue.id, "event": "issue.created" }),
        );
        self.alert_queue.enqueue(&job).await?;

        Ok(Some(issue))
    }
}
