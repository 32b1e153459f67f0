//! Detector contract and registry

use async_trait::async_trait;
use revback_database::Repositories;
use revback_shared::{CanonicalEvent, DetectedIssue};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for detector runs
pub type DetectionResult<T> = Result<T, DetectionError>;

/// Errors raised by detectors and the engine
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("storage error: {source}")]
    Database {
        #[from]
        source: revback_database::DatabaseError,
    },

    #[error("queue error: {source}")]
    Queue {
        #[from]
        source: revback_queue::QueueError,
    },

    #[error("unknown detector: {0}")]
    UnknownDetector(String),
}

/// A pluggable detection rule, addressed by a stable string id
#[async_trait]
pub trait Detector: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    /// Cron expression for the scheduled scan; `None` for event-only
    /// detectors.
    fn scan_cron(&self) -> Option<&'static str> {
        None
    }

    /// Synchronous check invoked by the pipeline for every stored event
    async fn check_event(
        &self,
        _repos: &Repositories,
        _org_id: Uuid,
        _event: &CanonicalEvent,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        Ok(Vec::new())
    }

    /// Periodic per-tenant sweep
    async fn scheduled_scan(
        &self,
        _repos: &Repositories,
        _org_id: Uuid,
    ) -> DetectionResult<Vec<DetectedIssue>> {
        Ok(Vec::new())
    }
}

/// Ordered registry of detectors
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: BTreeMap<&'static str, Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.insert(detector.id(), detector);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Detector>> {
        self.detectors.get(id).cloned()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.values()
    }

    /// Detectors that declare a scheduled scan
    pub fn scheduled(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.values().filter(|d| d.scan_cron().is_some())
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

/// The built-in registry: the minimum testable detector set
pub fn default_registry() -> DetectorRegistry {
    use crate::detectors::*;

    let mut registry = DetectorRegistry::new();
    registry.register(Arc::new(PaidNoAccessDetector));
    registry.register(Arc::new(RefundNotRevokedDetector));
    registry.register(Arc::new(EntitlementWithoutPaymentDetector));
    registry.register(Arc::new(WebhookDeliveryGapDetector));
    registry.register(Arc::new(CrossPlatformMismatchDetector));
    registry.register(Arc::new(SilentRenewalFailureDetector));
    registry.register(Arc::new(TrialNoConversionDetector));
    registry.register(Arc::new(VerifiedPaidNoAccessDetector));
    registry.register(Arc::new(VerifiedAccessNoPaymentDetector));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_the_required_set() {
        let registry = default_registry();
        for id in [
            "paid_no_access",
            "refund_not_revoked",
            "entitlement_without_payment",
            "webhook_delivery_gap",
            "cross_platform_mismatch",
            "silent_renewal_failure",
            "trial_no_conversion",
            "verified_paid_no_access",
            "verified_access_no_payment",
        ] {
            assert!(registry.get(id).is_some(), "missing detector {id}");
        }
        assert_eq!(registry.len(), 9);
    }

    #[test]
    fn scheduled_subset_excludes_event_only_detectors() {
        let registry = default_registry();
        let scheduled: Vec<&str> = registry.scheduled().map(|d| d.id()).collect();
        assert!(!scheduled.contains(&"paid_no_access"));
        assert!(scheduled.contains(&"webhook_delivery_gap"));
        assert!(scheduled.contains(&"trial_no_conversion"));
    }
}
