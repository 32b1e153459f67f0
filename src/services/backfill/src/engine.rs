//! Backfill orchestration
//!
//! The runner owns the shared shape: read the connection, decrypt
//! credentials, publish progress, dispatch to the provider import, and
//! settle the connection's sync status. Record failures accumulate as
//! error strings in the progress object; only authentication failures and
//! an open circuit abort the run.

use crate::apple::AppleBackfill;
use crate::error::{BackfillError, BackfillResult};
use crate::google::GoogleBackfill;
use crate::progress::ProgressStore;
use crate::recurly::RecurlyBackfill;
use crate::stripe::StripeBackfill;
use chrono::Utc;
use revback_database::Repositories;
use revback_ingestion::IngestionPipeline;
use revback_queue::{CircuitBreaker, RateLimiter};
use revback_security::CredentialCipher;
use revback_shared::{BackfillStatus, BillingConnection, BillingSource, SyncStatus};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Everything a provider import needs
pub struct BackfillContext {
    pub org_id: Uuid,
    pub connection: BillingConnection,
    pub credentials: Value,
    pub progress: ProgressStore,
    pub pipeline: Arc<IngestionPipeline>,
    pub repos: Repositories,
    pub limiter: RateLimiter,
    pub breaker: Arc<CircuitBreaker>,
    pub http: reqwest::Client,
}

impl BackfillContext {
    /// Record one non-fatal record failure into progress
    pub async fn record_error(&self, message: String) {
        let _ = self
            .progress
            .update(self.connection.source, self.org_id, |p| {
                if p.errors.len() < 100 {
                    p.errors.push(message);
                }
            })
            .await;
    }

    pub async fn bump_processed(&self) {
        let _ = self
            .progress
            .update(self.connection.source, self.org_id, |p| {
                p.subscriptions_processed += 1;
            })
            .await;
    }
}

/// Dispatches backfill runs per provider
#[derive(Clone)]
pub struct BackfillRunner {
    repos: Repositories,
    cipher: CredentialCipher,
    progress: ProgressStore,
    pipeline: Arc<IngestionPipeline>,
    http: reqwest::Client,
    limiters: Arc<dyn Fn(BillingSource) -> RateLimiter + Send + Sync>,
    breakers: Arc<dyn Fn(BillingSource) -> Arc<CircuitBreaker> + Send + Sync>,
}

impl BackfillRunner {
    pub fn new(
        repos: Repositories,
        cipher: CredentialCipher,
        progress: ProgressStore,
        pipeline: Arc<IngestionPipeline>,
        http: reqwest::Client,
        limiters: Arc<dyn Fn(BillingSource) -> RateLimiter + Send + Sync>,
        breakers: Arc<dyn Fn(BillingSource) -> Arc<CircuitBreaker> + Send + Sync>,
    ) -> Self {
        Self {
            repos,
            cipher,
            progress,
            pipeline,
            http,
            limiters,
            breakers,
        }
    }

    pub fn progress_store(&self) -> &ProgressStore {
        &self.progress
    }

    /// Run a full import for (org, source). The queue retries transient
    /// failures; auth failures are permanent.
    pub async fn run(&self, org_id: Uuid, source: BillingSource) -> BackfillResult<u64> {
        let connection = self
            .repos
            .connections
            .find(org_id, source)
            .await?
            .ok_or_else(|| BackfillError::MissingConnection {
                provider: source.to_string(),
            })?;

        let credentials: Value = self
            .cipher
            .decrypt_json(&connection.credentials)
            .map_err(|e| BackfillError::Credentials(e.to_string()))?;

        self.progress
            .write(source, org_id, &revback_shared::BackfillProgress::started(Utc::now()))
            .await?;
        self.repos
            .connections
            .set_sync_status(org_id, source, SyncStatus::InProgress, None)
            .await?;

        let ctx = BackfillContext {
            org_id,
            connection,
            credentials,
            progress: self.progress.clone(),
            pipeline: Arc::clone(&self.pipeline),
            repos: self.repos.clone(),
            limiter: (self.limiters)(source),
            breaker: (self.breakers)(source),
            http: self.http.clone(),
        };

        let result = match source {
            BillingSource::Stripe => StripeBackfill::new().run(&ctx).await,
            BillingSource::Recurly => RecurlyBackfill::new().run(&ctx).await,
            BillingSource::Apple => AppleBackfill::new().run(&ctx).await,
            BillingSource::Google => GoogleBackfill::new().run(&ctx).await,
            BillingSource::Braintree => Err(BackfillError::MissingConnection {
                provider: "braintree backfill not supported".to_string(),
            }),
        };

        match result {
            Ok(count) => {
                self.progress
                    .finish(source, org_id, BackfillStatus::Completed)
                    .await?;
                self.repos
                    .connections
                    .set_sync_status(org_id, source, SyncStatus::Completed, Some(Utc::now()))
                    .await?;
                info!(org_id = %org_id, source = %source, subscriptions = count, "backfill completed");
                Ok(count)
            }
            Err(e) => {
                self.progress
                    .finish(source, org_id, BackfillStatus::Failed)
                    .await?;
                self.repos
                    .connections
                    .set_sync_status(org_id, source, SyncStatus::Failed, None)
                    .await?;
                error!(org_id = %org_id, source = %source, error = %e, "backfill failed");
                Err(e)
            }
        }
    }
}
