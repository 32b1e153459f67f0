//! Durable named queues on Redis
//!
//! Layout per queue `<name>`:
//! - `rbq:<name>:waiting` — list of job ids ready for pickup
//! - `rbq:<name>:active` — list of job ids currently held by a worker
//! - `rbq:<name>:delayed` — zset of job ids scored by ready-at (epoch ms)
//! - `rbq:<name>:dead` — list of job ids that exhausted their attempts
//! - `rbq:<name>:job:<id>` — job envelope JSON
//! - `rbq:<name>:repeat` — zset of repeat keys scored by next fire time
//! - `rbq:<name>:repeat:def:<key>` — repeatable definition JSON
//!
//! Delivery is at-least-once: a job id sits in `active` while its handler
//! runs, so a crashed worker leaves evidence that `requeue_active` sweeps
//! back into `waiting` on restart.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobError, JobOutcome, JobResult, RetryPolicy};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Handler invoked by the worker loop for each job attempt
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult;
}

/// Definition of a cron-repeatable job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatDefinition {
    pub repeat_key: String,
    /// Five-field cron expression, UTC
    pub cron: String,
    pub payload: Value,
    pub retry: RetryPolicy,
    pub timeout_ms: u64,
}

/// Point-in-time counts for a queue, served by the admin endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: String,
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
    /// Jobs completed in the current minute bucket
    pub processed_last_minute: u64,
    pub avg_processing_ms: f64,
    /// Age of the oldest waiting job, if any
    pub oldest_waiting_ms: Option<u64>,
}

/// Job listing states accepted by [`Queue::list_jobs`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Waiting,
    Active,
    Delayed,
    Dead,
}

/// Compute the next fire time of a cron expression after `after`.
///
/// Accepts standard five-field expressions; a seconds field of `0` is
/// prepended before parsing.
pub fn next_cron_fire(expression: &str, after: DateTime<Utc>) -> QueueResult<DateTime<Utc>> {
    let normalized = if expression.split_whitespace().count() == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    };
    let schedule = Schedule::from_str(&normalized).map_err(|e| QueueError::InvalidCron {
        expression: expression.to_string(),
        reason: e.to_string(),
    })?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| QueueError::InvalidCron {
            expression: expression.to_string(),
            reason: "no upcoming fire time".to_string(),
        })
}

/// A named durable queue
#[derive(Clone)]
pub struct Queue {
    name: String,
    conn: ConnectionManager,
}

impl Queue {
    pub fn new(name: impl Into<String>, conn: ConnectionManager) -> Self {
        Self {
            name: name.into(),
            conn,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self, suffix: &str) -> String {
        format!("rbq:{}:{}", self.name, suffix)
    }

    fn job_key(&self, id: Uuid) -> String {
        self.key(&format!("job:{id}"))
    }

    /// Enqueue a job for immediate delivery
    pub async fn enqueue(&self, job: &Job) -> QueueResult<Uuid> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(self.job_key(job.id), body).await?;
        conn.lpush::<_, _, ()>(self.key("waiting"), job.id.to_string())
            .await?;
        debug!(queue = %self.name, job_id = %job.id, "job enqueued");
        Ok(job.id)
    }

    /// Enqueue a job for delivery after `delay`
    pub async fn enqueue_delayed(&self, job: &Job, delay: Duration) -> QueueResult<Uuid> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(job)?;
        let ready_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
        conn.set::<_, _, ()>(self.job_key(job.id), body).await?;
        conn.zadd::<_, _, _, ()>(
            self.key("delayed"),
            job.id.to_string(),
            ready_at.timestamp_millis(),
        )
        .await?;
        Ok(job.id)
    }

    /// Register (or replace) a cron-repeatable job.
    ///
    /// The next fire time is computed immediately; subsequent fire times are
    /// computed when each instance completes promotion.
    pub async fn upsert_repeatable(&self, def: &RepeatDefinition) -> QueueResult<DateTime<Utc>> {
        let next = next_cron_fire(&def.cron, Utc::now())?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(
            self.key(&format!("repeat:def:{}", def.repeat_key)),
            serde_json::to_string(def)?,
        )
        .await?;
        conn.zadd::<_, _, _, ()>(
            self.key("repeat"),
            def.repeat_key.clone(),
            next.timestamp_millis(),
        )
        .await?;
        debug!(queue = %self.name, repeat_key = %def.repeat_key, next = %next, "repeatable registered");
        Ok(next)
    }

    pub async fn remove_repeatable(&self, repeat_key: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(self.key("repeat"), repeat_key).await?;
        conn.del::<_, ()>(self.key(&format!("repeat:def:{repeat_key}")))
            .await?;
        Ok(())
    }

    /// Move due delayed jobs into `waiting` and fire due repeatables.
    /// Called by the worker loop each poll; safe to run concurrently
    /// because ZREM is the claim.
    pub async fn promote_due(&self) -> QueueResult<usize> {
        let now_ms = Utc::now().timestamp_millis();
        let mut promoted = 0;
        let mut conn = self.conn.clone();

        let due: Vec<String> = conn
            .zrangebyscore_limit(self.key("delayed"), 0, now_ms, 0, 100)
            .await?;
        for id in due {
            // only the claimer promotes
            let removed: i64 = conn.zrem(self.key("delayed"), &id).await?;
            if removed > 0 {
                conn.lpush::<_, _, ()>(self.key("waiting"), &id).await?;
                promoted += 1;
            }
        }

        let due_repeats: Vec<String> = conn
            .zrangebyscore_limit(self.key("repeat"), 0, now_ms, 0, 100)
            .await?;
        for repeat_key in due_repeats {
            let removed: i64 = conn.zrem(self.key("repeat"), &repeat_key).await?;
            if removed == 0 {
                continue;
            }
            let def_json: Option<String> = conn
                .get(self.key(&format!("repeat:def:{repeat_key}")))
                .await?;
            let Some(def_json) = def_json else { continue };
            let def: RepeatDefinition = serde_json::from_str(&def_json)?;

            let mut job = Job::new(self.name.clone(), def.payload.clone())
                .with_retry(def.retry.clone())
                .with_timeout(Duration::from_millis(def.timeout_ms));
            job.repeat_key = Some(repeat_key.clone());
            self.enqueue(&job).await?;
            promoted += 1;

            // schedule the next occurrence
            let next = next_cron_fire(&def.cron, Utc::now())?;
            conn.zadd::<_, _, _, ()>(self.key("repeat"), repeat_key, next.timestamp_millis())
                .await?;
        }

        Ok(promoted)
    }

    /// Pop the next waiting job, moving its id into `active`
    pub async fn next_job(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn
            .rpoplpush(self.key("waiting"), self.key("active"))
            .await?;
        let Some(id) = id else { return Ok(None) };
        let body: Option<String> = conn.get(self.key(&format!("job:{id}"))).await?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => {
                // orphaned id; drop it from active and move on
                conn.lrem::<_, _, ()>(self.key("active"), 1, &id).await?;
                warn!(queue = %self.name, job_id = %id, "orphaned job id without envelope");
                Ok(None)
            }
        }
    }

    /// Record a successful attempt
    pub async fn complete(&self, job: &Job, processing: Duration) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        conn.lrem::<_, _, ()>(self.key("active"), 1, &id).await?;
        conn.del::<_, ()>(self.job_key(job.id)).await?;
        conn.incr::<_, _, ()>(self.key("completed"), 1).await?;
        conn.incr::<_, _, ()>(self.key("proc_ms_total"), processing.as_millis() as u64)
            .await?;
        conn.incr::<_, _, ()>(self.key("proc_count"), 1).await?;

        let minute_bucket = self.key(&format!("completed:min:{}", Utc::now().timestamp() / 60));
        conn.incr::<_, _, ()>(&minute_bucket, 1).await?;
        conn.expire::<_, ()>(&minute_bucket, 120).await?;
        Ok(())
    }

    /// Record a failed attempt; either reschedules or dead-letters.
    pub async fn fail(&self, job: &mut Job, err: &JobError) -> QueueResult<JobOutcome> {
        let mut conn = self.conn.clone();
        let id = job.id.to_string();
        conn.lrem::<_, _, ()>(self.key("active"), 1, &id).await?;

        job.attempts_made += 1;
        job.last_error = Some(err.message.clone());

        let retry_delay = if err.retryable {
            job.next_retry_delay()
        } else {
            None
        };

        match retry_delay {
            Some(delay) => {
                let body = serde_json::to_string(&job)?;
                let ready_at = Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64);
                conn.set::<_, _, ()>(self.job_key(job.id), body).await?;
                conn.zadd::<_, _, _, ()>(
                    self.key("delayed"),
                    id,
                    ready_at.timestamp_millis(),
                )
                .await?;
                debug!(
                    queue = %self.name,
                    job_id = %job.id,
                    attempt = job.attempts_made,
                    delay_ms = delay.as_millis() as u64,
                    "job scheduled for retry"
                );
                Ok(JobOutcome::Retried)
            }
            None => {
                let body = serde_json::to_string(&job)?;
                conn.set::<_, _, ()>(self.job_key(job.id), body).await?;
                conn.lpush::<_, _, ()>(self.key("dead"), &id).await?;
                conn.incr::<_, _, ()>(self.key("failed"), 1).await?;
                warn!(
                    queue = %self.name,
                    job_id = %job.id,
                    attempts = job.attempts_made,
                    error = %err.message,
                    "job dead-lettered"
                );
                Ok(JobOutcome::DeadLettered)
            }
        }
    }

    /// Sweep `active` back into `waiting`. Called on startup and shutdown so
    /// jobs held by a dead or stopping worker are redelivered.
    pub async fn requeue_active(&self) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let mut moved = 0;
        loop {
            let id: Option<String> = conn
                .rpoplpush(self.key("active"), self.key("waiting"))
                .await?;
            if id.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            info!(queue = %self.name, count = moved, "requeued active jobs");
        }
        Ok(moved)
    }

    /// Current counts for the admin endpoint
    pub async fn stats(&self) -> QueueResult<QueueStats> {
        let mut conn = self.conn.clone();
        let waiting: u64 = conn.llen(self.key("waiting")).await?;
        let active: u64 = conn.llen(self.key("active")).await?;
        let delayed: u64 = conn.zcard(self.key("delayed")).await?;
        let dead: u64 = conn.llen(self.key("dead")).await?;
        let completed: u64 = conn.get::<_, Option<u64>>(self.key("completed")).await?.unwrap_or(0);
        let failed: u64 = conn.get::<_, Option<u64>>(self.key("failed")).await?.unwrap_or(0);
        let proc_ms: u64 = conn
            .get::<_, Option<u64>>(self.key("proc_ms_total"))
            .await?
            .unwrap_or(0);
        let proc_count: u64 = conn
            .get::<_, Option<u64>>(self.key("proc_count"))
            .await?
            .unwrap_or(0);
        let minute_bucket = self.key(&format!("completed:min:{}", Utc::now().timestamp() / 60));
        let processed_last_minute: u64 =
            conn.get::<_, Option<u64>>(minute_bucket).await?.unwrap_or(0);

        let oldest_waiting_ms = {
            let tail: Option<String> = conn.lindex(self.key("waiting"), -1).await?;
            match tail {
                Some(id) => {
                    let body: Option<String> = conn.get(self.key(&format!("job:{id}"))).await?;
                    body.and_then(|b| serde_json::from_str::<Job>(&b).ok())
                        .map(|j| (Utc::now() - j.enqueued_at).num_milliseconds().max(0) as u64)
                }
                None => None,
            }
        };

        Ok(QueueStats {
            name: self.name.clone(),
            waiting,
            active,
            delayed,
            completed,
            failed,
            dead,
            processed_last_minute,
            avg_processing_ms: if proc_count > 0 {
                proc_ms as f64 / proc_count as f64
            } else {
                0.0
            },
            oldest_waiting_ms,
        })
    }

    /// List job envelopes in a given state, newest first, up to `limit`
    pub async fn list_jobs(&self, state: JobState, limit: isize) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = match state {
            JobState::Waiting => conn.lrange(self.key("waiting"), 0, limit - 1).await?,
            JobState::Active => conn.lrange(self.key("active"), 0, limit - 1).await?,
            JobState::Dead => conn.lrange(self.key("dead"), 0, limit - 1).await?,
            JobState::Delayed => {
                conn.zrangebyscore_limit(self.key("delayed"), 0, i64::MAX, 0, limit)
                    .await?
            }
        };
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            let body: Option<String> = conn.get(self.key(&format!("job:{id}"))).await?;
            if let Some(body) = body {
                jobs.push(serde_json::from_str(&body)?);
            }
        }
        Ok(jobs)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// A worker pool consuming one queue
pub struct Worker {
    queue: Queue,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    shutdown: CancellationToken,
}

impl Worker {
    pub fn new(
        queue: Queue,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            shutdown,
        }
    }

    /// Run until the shutdown token fires. In-flight jobs finish their
    /// current attempt; anything still in `active` afterwards is swept back
    /// to `waiting`.
    pub async fn run(self) {
        info!(
            queue = %self.queue.name(),
            concurrency = self.config.concurrency,
            "worker pool starting"
        );
        let mut handles = Vec::with_capacity(self.config.concurrency);
        for slot in 0..self.config.concurrency {
            let queue = self.queue.clone();
            let handler = Arc::clone(&self.handler);
            let shutdown = self.shutdown.clone();
            let poll_interval = self.config.poll_interval;
            // slot 0 also promotes delayed/repeatable jobs
            let promotes = slot == 0;
            handles.push(tokio::spawn(async move {
                consume_loop(queue, handler, shutdown, poll_interval, promotes).await;
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
        if let Err(e) = self.queue.requeue_active().await {
            error!(queue = %self.queue.name(), error = %e, "failed to requeue active jobs on shutdown");
        }
        info!(queue = %self.queue.name(), "worker pool stopped");
    }
}

async fn consume_loop(
    queue: Queue,
    handler: Arc<dyn JobHandler>,
    shutdown: CancellationToken,
    poll_interval: Duration,
    promotes: bool,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        if promotes {
            if let Err(e) = queue.promote_due().await {
                error!(queue = %queue.name(), error = %e, "promotion sweep failed");
            }
        }
        let job = match queue.next_job().await {
            Ok(job) => job,
            Err(e) => {
                error!(queue = %queue.name(), error = %e, "failed to fetch next job");
                tokio::time::sleep(poll_interval).await;
                continue;
            }
        };
        let Some(mut job) = job else {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => continue,
            }
        };

        let started = std::time::Instant::now();
        let attempt =
            tokio::time::timeout(Duration::from_millis(job.timeout_ms), handler.handle(&job)).await;
        let result: JobResult = match attempt {
            Ok(result) => result,
            Err(_) => Err(JobError::retryable(format!(
                "attempt timed out after {}ms",
                job.timeout_ms
            ))),
        };

        match result {
            Ok(()) => {
                if let Err(e) = queue.complete(&job, started.elapsed()).await {
                    error!(queue = %queue.name(), job_id = %job.id, error = %e, "failed to record completion");
                }
            }
            Err(job_err) => {
                match queue.fail(&mut job, &job_err).await {
                    Ok(JobOutcome::DeadLettered) => {
                        error!(
                            queue = %queue.name(),
                            job_id = %job.id,
                            error = %job_err.message,
                            "job moved to dead-letter pool"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(queue = %queue.name(), job_id = %job.id, error = %e, "failed to record failure");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn five_field_cron_is_normalized() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let next = next_cron_fire("0 3 * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn six_field_cron_is_accepted_as_is() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let next = next_cron_fire("0 */15 * * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 2, 15, 0).unwrap());
    }

    #[test]
    fn invalid_cron_is_reported() {
        let err = next_cron_fire("not a cron", Utc::now()).unwrap_err();
        assert!(matches!(err, QueueError::InvalidCron { .. }));
    }

    #[test]
    fn retention_schedule_fires_daily_at_three_utc() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 3, 0, 1).unwrap();
        let next = next_cron_fire("0 3 * * *", after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 2, 3, 0, 0).unwrap());
    }
}
