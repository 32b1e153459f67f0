//! Queue worker wiring
//!
//! One handler per durable queue, mapping job payloads onto the service
//! entry points. Error mapping decides retry behavior: deterministic
//! failures (bad signatures, missing connections, rejected credentials)
//! dead-letter immediately; everything else walks the job's retry policy.

use crate::state::AppState;
use async_trait::async_trait;
use revback_queue::{Job, JobError, JobHandler, JobResult, Queue, Worker, WorkerConfig};
use revback_shared::BillingSource;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

fn field_uuid(job: &Job, field: &str) -> Result<Uuid, JobError> {
    job.payload[field]
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| JobError::permanent(format!("payload missing {field}")))
}

fn field_source(job: &Job, field: &str) -> Result<BillingSource, JobError> {
    job.payload[field]
        .as_str()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| JobError::permanent(format!("payload missing {field}")))
}

fn field_str<'a>(job: &'a Job, field: &str) -> Result<&'a str, JobError> {
    job.payload[field]
        .as_str()
        .ok_or_else(|| JobError::permanent(format!("payload missing {field}")))
}

/// webhook-processing: run the ingestion pipeline on a logged webhook
struct WebhookProcessingHandler {
    state: AppState,
}

#[async_trait]
impl JobHandler for WebhookProcessingHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let org_id = field_uuid(job, "org_id")?;
        let source = field_source(job, "source")?;
        let webhook_log_id = field_uuid(job, "webhook_log_id")?;

        match self
            .state
            .pipeline
            .process_webhook_log(org_id, source, webhook_log_id)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_retryable() => Err(JobError::retryable(e.to_string())),
            Err(e) => Err(JobError::permanent(e.to_string())),
        }
    }
}

/// alert-dispatch: fan an issue lifecycle event out to channels
struct AlertDispatchHandler {
    state: AppState,
}

#[async_trait]
impl JobHandler for AlertDispatchHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let org_id = field_uuid(job, "org_id")?;
        let issue_id = field_uuid(job, "issue_id")?;
        let event = field_str(job, "event")?;

        self.state
            .dispatcher
            .dispatch(org_id, issue_id, event)
            .await
            .map(|_| ())
            .map_err(|e| JobError::retryable(e.to_string()))
    }
}

/// webhook-delivery: one signed POST to one customer endpoint
struct WebhookDeliveryHandler {
    state: AppState,
}

#[async_trait]
impl JobHandler for WebhookDeliveryHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let org_id = field_uuid(job, "org_id")?;
        let alert_config_id = field_uuid(job, "alert_config_id")?;
        let issue_id = field_uuid(job, "issue_id")?;
        let event = field_str(job, "event")?;

        use revback_delivery::DeliveryError;
        match self
            .state
            .outbound
            .deliver(org_id, alert_config_id, issue_id, event)
            .await
        {
            Ok(()) => Ok(()),
            // a deleted config or issue will never deliver
            Err(DeliveryError::NotFound { resource }) => {
                Err(JobError::permanent(format!("{resource} not found")))
            }
            Err(e) => Err(JobError::retryable(e.to_string())),
        }
    }
}

/// scheduled-scans: run one detector's scan for one tenant
struct ScheduledScanHandler {
    state: AppState,
}

#[async_trait]
impl JobHandler for ScheduledScanHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let org_id = field_uuid(job, "org_id")?;
        let detector_id = field_str(job, "detector_id")?;

        use revback_detection::DetectionError;
        match self.state.detection.run_scan(org_id, detector_id).await {
            Ok(_) => Ok(()),
            Err(DetectionError::UnknownDetector(d)) => {
                Err(JobError::permanent(format!("unknown detector {d}")))
            }
            Err(e) => Err(JobError::retryable(e.to_string())),
        }
    }
}

/// data-retention: the daily sweep
struct RetentionHandler {
    state: AppState,
}

#[async_trait]
impl JobHandler for RetentionHandler {
    async fn handle(&self, _job: &Job) -> JobResult {
        revback_detection::run_retention(self.state.db.repos())
            .await
            .map(|_| ())
            .map_err(|e| JobError::retryable(e.to_string()))
    }
}

/// ingestion-backfill: a full historical import
struct BackfillHandler {
    state: AppState,
}

#[async_trait]
impl JobHandler for BackfillHandler {
    async fn handle(&self, job: &Job) -> JobResult {
        let org_id = field_uuid(job, "org_id")?;
        let source = field_source(job, "source")?;

        use revback_backfill::BackfillError;
        match self.state.backfill.run(org_id, source).await {
            Ok(_) => Ok(()),
            Err(e @ (BackfillError::Credentials(_) | BackfillError::AuthRejected { .. })) => {
                Err(JobError::permanent(e.to_string()))
            }
            Err(e) => Err(JobError::retryable(e.to_string())),
        }
    }
}

fn spawn(
    queue: Queue,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let worker = Worker::new(
        queue,
        handler,
        WorkerConfig {
            concurrency,
            poll_interval: Duration::from_millis(250),
        },
        shutdown,
    );
    tokio::spawn(worker.run())
}

/// Start one worker pool per queue. Concurrency reflects each queue's
/// workload: webhook processing takes the burst, backfill is one at a
/// time per worker slot.
pub async fn spawn_workers(state: &AppState, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    // jobs abandoned by a previous process go back to waiting first
    for queue in state.queues.all() {
        let _ = queue.requeue_active().await;
    }

    let handles = vec![
        spawn(
            state.queues.webhook_processing.clone(),
            Arc::new(WebhookProcessingHandler { state: state.clone() }),
            8,
            shutdown.clone(),
        ),
        spawn(
            state.queues.alert_dispatch.clone(),
            Arc::new(AlertDispatchHandler { state: state.clone() }),
            4,
            shutdown.clone(),
        ),
        spawn(
            state.queues.webhook_delivery.clone(),
            Arc::new(WebhookDeliveryHandler { state: state.clone() }),
            4,
            shutdown.clone(),
        ),
        spawn(
            state.queues.scheduled_scans.clone(),
            Arc::new(ScheduledScanHandler { state: state.clone() }),
            2,
            shutdown.clone(),
        ),
        spawn(
            state.queues.data_retention.clone(),
            Arc::new(RetentionHandler { state: state.clone() }),
            1,
            shutdown.clone(),
        ),
        spawn(
            state.queues.ingestion_backfill.clone(),
            Arc::new(BackfillHandler { state: state.clone() }),
            2,
            shutdown,
        ),
    ];

    info!(pools = handles.len(), "queue workers started");
    handles
}
