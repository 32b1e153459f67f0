//! The ingestion pipeline
//!
//! Orchestrates: connection lookup → signature verify → normalize →
//! resolve user → resolve product → idempotent insert → detection checks →
//! entitlement transition → webhook-log finalization.
//!
//! Detection runs *before* the entitlement engine on purpose: detectors
//! must see the entitlement state the event found, not the state it
//! produces (a payment landing on an expired entitlement is an anomaly even
//! though the transition then repairs it).
//!
//! Backfill enters through [`IngestionPipeline::process_trusted`], which
//! skips signature verification but follows the same path; the resulting
//! canonical events are tagged with their ingest source for the auditor.

use crate::error::{IngestionError, IngestionResult};
use crate::identity::IdentityResolver;
use crate::normalizers::{normalizer_for, ConnectionContext, InboundWebhook, Normalizer};
use revback_database::repositories::NewCanonicalEvent;
use revback_database::Repositories;
use revback_detection::DetectionEngine;
use revback_entitlements::EntitlementEngine;
use revback_security::CredentialCipher;
use revback_shared::{
    BillingConnection, BillingSource, IngestSource, NormalizedEvent, ProcessingStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outcome of processing one webhook through the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineReport {
    pub webhook_log_id: Option<Uuid>,
    pub events_received: usize,
    pub events_inserted: usize,
    pub duplicates: usize,
    pub issues_created: usize,
    pub skipped: bool,
    pub errors: Vec<String>,
}

/// The ingestion pipeline
#[derive(Clone)]
pub struct IngestionPipeline {
    repos: Repositories,
    identity: IdentityResolver,
    entitlements: EntitlementEngine,
    detection: DetectionEngine,
    cipher: CredentialCipher,
    http: reqwest::Client,
    /// Public base URL of this deployment, used for Google's audience check
    public_base_url: Option<String>,
    /// Optional normalizer overrides (e.g. Google with enrichment wired)
    overrides: Vec<Arc<dyn Normalizer>>,
}

impl IngestionPipeline {
    pub fn new(
        repos: Repositories,
        entitlements: EntitlementEngine,
        detection: DetectionEngine,
        cipher: CredentialCipher,
        http: reqwest::Client,
        public_base_url: Option<String>,
    ) -> Self {
        Self {
            identity: IdentityResolver::new(repos.clone()),
            repos,
            entitlements,
            detection,
            cipher,
            http,
            public_base_url,
            overrides: Vec::new(),
        }
    }

    /// Install a normalizer override, replacing the registry default for
    /// its source (used to wire Google Play enrichment).
    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.overrides.push(normalizer);
        self
    }

    fn normalizer(&self, source: BillingSource) -> IngestionResult<Arc<dyn Normalizer>> {
        if let Some(n) = self.overrides.iter().find(|n| n.source() == source) {
            return Ok(Arc::clone(n));
        }
        normalizer_for(source, self.http.clone())
            .ok_or_else(|| IngestionError::internal(format!("no normalizer for {source}")))
    }

    /// Process a webhook previously logged by the receiver. This is the
    /// webhook-processing queue handler's entry point.
    pub async fn process_webhook_log(
        &self,
        org_id: Uuid,
        source: BillingSource,
        webhook_log_id: Uuid,
    ) -> IngestionResult<PipelineReport> {
        let log = self
            .repos
            .webhook_logs
            .find_by_id(org_id, webhook_log_id)
            .await?
            .ok_or_else(|| IngestionError::internal("webhook log vanished"))?;

        let webhook = InboundWebhook {
            body: log.body.clone().unwrap_or_default(),
            headers: log
                .headers
                .as_ref()
                .and_then(|h| serde_json::from_value(h.clone()).ok())
                .unwrap_or_default(),
        };

        let result = self
            .run(org_id, source, &webhook, true, IngestSource::Webhook)
            .await;

        match &result {
            Ok(report) => {
                let status = if report.skipped {
                    ProcessingStatus::Skipped
                } else if report.errors.is_empty() {
                    ProcessingStatus::Processed
                } else if report.events_inserted == 0 && report.duplicates == 0 {
                    ProcessingStatus::Failed
                } else {
                    ProcessingStatus::Processed
                };
                let error = if report.errors.is_empty() {
                    None
                } else {
                    Some(report.errors.join("; "))
                };
                self.repos
                    .webhook_logs
                    .set_status(org_id, webhook_log_id, status, error.as_deref())
                    .await?;
            }
            Err(e) => {
                self.repos
                    .webhook_logs
                    .set_status(
                        org_id,
                        webhook_log_id,
                        ProcessingStatus::Failed,
                        Some(e.to_string()).as_deref(),
                    )
                    .await?;
            }
        }

        result.map(|mut report| {
            report.webhook_log_id = Some(webhook_log_id);
            report
        })
    }

    /// Trusted-source entry point: signature verification is skipped and
    /// events are tagged as backfill-sourced.
    pub async fn process_trusted(
        &self,
        org_id: Uuid,
        source: BillingSource,
        webhook: &InboundWebhook,
    ) -> IngestionResult<PipelineReport> {
        self.run(org_id, source, webhook, false, IngestSource::Backfill)
            .await
    }

    async fn run(
        &self,
        org_id: Uuid,
        source: BillingSource,
        webhook: &InboundWebhook,
        verify: bool,
        ingest_source: IngestSource,
    ) -> IngestionResult<PipelineReport> {
        let connection = self
            .repos
            .connections
            .find(org_id, source)
            .await?
            .ok_or_else(|| IngestionError::missing_connection(source.as_str()))?;

        let ctx = self.connection_context(org_id, &connection).await?;
        let normalizer = self.normalizer(source)?;

        if verify && requires_verification(source, &ctx) {
            normalizer.verify_signature(webhook, &ctx).await?;
        }

        let events = normalizer.normalize(org_id, webhook, &ctx).await?;
        if events.is_empty() {
            debug!(org_id = %org_id, source = %source, "webhook produced no canonical events");
            return Ok(PipelineReport {
                skipped: true,
                ..Default::default()
            });
        }

        let mut report = PipelineReport {
            events_received: events.len(),
            ..Default::default()
        };

        // one bad event must not abort the others from the same webhook
        for event in &events {
            match self.ingest_one(org_id, event, ingest_source).await {
                Ok(Ingested::Inserted { issues }) => {
                    report.events_inserted += 1;
                    report.issues_created += issues;
                }
                Ok(Ingested::Duplicate) => report.duplicates += 1,
                Err(e) => {
                    warn!(
                        org_id = %org_id,
                        source = %source,
                        idempotency_key = %event.idempotency_key,
                        error = %e,
                        "event failed to ingest"
                    );
                    report.errors.push(format!("{}: {e}", event.idempotency_key));
                }
            }
        }

        info!(
            org_id = %org_id,
            source = %source,
            received = report.events_received,
            inserted = report.events_inserted,
            duplicates = report.duplicates,
            issues = report.issues_created,
            errors = report.errors.len(),
            "webhook processed"
        );
        Ok(report)
    }

    async fn ingest_one(
        &self,
        org_id: Uuid,
        event: &NormalizedEvent,
        ingest_source: IngestSource,
    ) -> IngestionResult<Ingested> {
        let user_id = if event.identity_hints.is_empty() {
            None
        } else {
            Some(self.identity.resolve(org_id, &event.identity_hints).await?)
        };

        let product_id = match &event.external_product_id {
            Some(external_id) => Some(
                self.repos
                    .products
                    .resolve_external(org_id, event.source, external_id)
                    .await?
                    .id,
            ),
            None => None,
        };

        let Some(stored) = self
            .repos
            .events
            .insert_idempotent(NewCanonicalEvent {
                org_id,
                user_id,
                product_id,
                ingest_source,
                event,
            })
            .await?
        else {
            debug!(
                org_id = %org_id,
                idempotency_key = %event.idempotency_key,
                "duplicate canonical event, skipping"
            );
            return Ok(Ingested::Duplicate);
        };

        // detection first: detectors observe the pre-transition state
        let issues = self
            .detection
            .run_event_checks(org_id, &stored)
            .await
            .map(|v| v.len())
            .unwrap_or_else(|e| {
                warn!(org_id = %org_id, event_id = %stored.id, error = %e, "detection pass failed");
                0
            });

        self.entitlements.apply(&stored).await?;
        self.repos.events.set_processed(org_id, stored.id).await?;

        Ok(Ingested::Inserted { issues })
    }

    async fn connection_context(
        &self,
        org_id: Uuid,
        connection: &BillingConnection,
    ) -> IngestionResult<ConnectionContext> {
        let credentials = if connection.credentials.is_empty() {
            None
        } else {
            Some(
                self.cipher
                    .decrypt_json(&connection.credentials)
                    .map_err(|e| IngestionError::Credentials(e.to_string()))?,
            )
        };

        let endpoint_url = match &self.public_base_url {
            Some(base) => {
                let org = self.repos.organizations.find_by_id(org_id).await?;
                org.map(|o| {
                    format!(
                        "{}/webhooks/{}/{}",
                        base.trim_end_matches('/'),
                        o.slug,
                        connection.source
                    )
                })
            }
            None => None,
        };

        Ok(ConnectionContext {
            webhook_secret: connection.webhook_secret.clone(),
            credentials,
            endpoint_url,
        })
    }
}

/// Whether the pipeline runs signature verification for this webhook.
/// JWT providers always verify; HMAC providers verify when a secret is
/// configured.
fn requires_verification(source: BillingSource, ctx: &ConnectionContext) -> bool {
    match source {
        BillingSource::Apple | BillingSource::Google => true,
        _ => ctx.webhook_secret.is_some(),
    }
}

enum Ingested {
    Inserted { issues: usize },
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hmac_sources_verify_only_with_a_secret() {
        let without = ConnectionContext::default();
        let with = ConnectionContext {
            webhook_secret: Some("whsec".into()),
            ..Default::default()
        };
        assert!(!requires_verification(BillingSource::Stripe, &without));
        assert!(requires_verification(BillingSource::Stripe, &with));
        assert!(!requires_verification(BillingSource::Recurly, &without));
    }

    #[test]
    fn jwt_sources_always_verify() {
        let without = ConnectionContext::default();
        assert!(requires_verification(BillingSource::Apple, &without));
        assert!(requires_verification(BillingSource::Google, &without));
    }
}
