//! Job envelope and retry policy
//!
//! A [`Job`] is the unit of work stored in Redis. The envelope carries its
//! own retry policy so the worker loop never needs per-queue configuration
//! to decide what happens on failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Per-job retry policy: attempt budget and exponential backoff shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Base delay before the first retry
    pub backoff_base_ms: u64,
    /// Multiplier applied per subsequent retry
    pub backoff_multiplier: f64,
    /// Cap applied after multiplication
    pub backoff_max_ms: u64,
    /// Randomize each delay by ±25%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 5_000,
            backoff_multiplier: 2.0,
            backoff_max_ms: 15 * 60 * 1000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Fixed schedule used by outbound webhook delivery
    pub fn from_schedule(delays: &[Duration]) -> ScheduledRetries {
        ScheduledRetries {
            delays_ms: delays.iter().map(|d| d.as_millis() as u64).collect(),
        }
    }

    /// Delay before retry number `retry` (0-based: the delay after the
    /// first failed attempt is `delay_for(0)`).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let raw = (self.backoff_base_ms as f64) * self.backoff_multiplier.powi(retry as i32);
        let mut delay_ms = raw.min(self.backoff_max_ms as f64) as u64;
        if self.jitter {
            use rand::Rng;
            let factor = rand::thread_rng().gen_range(0.75..=1.25);
            delay_ms = ((delay_ms as f64) * factor) as u64;
        }
        Duration::from_millis(delay_ms)
    }
}

/// An explicit retry schedule, for queues whose intervals are fixed rather
/// than exponential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledRetries {
    pub delays_ms: Vec<u64>,
}

impl ScheduledRetries {
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        self.delays_ms
            .get(retry as usize)
            .map(|ms| Duration::from_millis(*ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.delays_ms.len() as u32 + 1
    }
}

/// A queued unit of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub queue: String,
    /// Handler-defined payload
    pub payload: Value,
    pub attempts_made: u32,
    pub retry: RetryPolicy,
    /// Optional fixed schedule; when present it takes precedence over
    /// the exponential policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_schedule: Option<ScheduledRetries>,
    /// Wall-clock timeout for a single attempt
    pub timeout_ms: u64,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Set when this job instance was produced by a repeatable schedule
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_key: Option<String>,
}

impl Job {
    pub fn new(queue: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: queue.into(),
            payload,
            attempts_made: 0,
            retry: RetryPolicy::default(),
            retry_schedule: None,
            timeout_ms: 60_000,
            enqueued_at: Utc::now(),
            last_error: None,
            repeat_key: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_schedule(mut self, schedule: ScheduledRetries) -> Self {
        self.retry_schedule = Some(schedule);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Attempts allowed for this job
    pub fn max_attempts(&self) -> u32 {
        match &self.retry_schedule {
            Some(schedule) => schedule.max_attempts(),
            None => self.retry.max_attempts,
        }
    }

    /// Delay before the next attempt, given that `attempts_made` attempts
    /// have already failed. `None` when the budget is exhausted.
    pub fn next_retry_delay(&self) -> Option<Duration> {
        if self.attempts_made >= self.max_attempts() {
            return None;
        }
        let retry_index = self.attempts_made.saturating_sub(1);
        match &self.retry_schedule {
            Some(schedule) => schedule.delay_for(retry_index),
            None => Some(self.retry.delay_for(retry_index)),
        }
    }
}

/// Error returned by a job handler
#[derive(Debug, Clone)]
pub struct JobError {
    pub message: String,
    /// Permanent errors skip the retry budget and dead-letter immediately
    pub retryable: bool,
}

impl JobError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobError {}

/// Result type returned by job handlers
pub type JobResult = Result<(), JobError>;

/// What the worker loop did with a finished attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retried,
    DeadLettered,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter(policy: RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            jitter: false,
            ..policy
        }
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let policy = no_jitter(RetryPolicy {
            max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_multiplier: 2.0,
            backoff_max_ms: 3_000,
            jitter: true,
        });
        assert_eq!(policy.delay_for(0), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(1), Duration::from_millis(2_000));
        // capped
        assert_eq!(policy.delay_for(2), Duration::from_millis(3_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(3_000));
    }

    #[test]
    fn jitter_stays_within_quarter_band() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 10_000,
            backoff_multiplier: 1.0,
            backoff_max_ms: 60_000,
            jitter: true,
        };
        for _ in 0..50 {
            let delay = policy.delay_for(0).as_millis() as u64;
            assert!((7_500..=12_500).contains(&delay), "delay {delay} out of band");
        }
    }

    #[test]
    fn job_exhausts_retry_budget() {
        let mut job = Job::new("scheduled-scans", serde_json::json!({}));
        job.retry = no_jitter(RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 30_000,
            backoff_multiplier: 2.0,
            backoff_max_ms: 600_000,
            jitter: true,
        });

        job.attempts_made = 1;
        assert_eq!(job.next_retry_delay(), Some(Duration::from_millis(30_000)));
        job.attempts_made = 2;
        assert_eq!(job.next_retry_delay(), Some(Duration::from_millis(60_000)));
        job.attempts_made = 3;
        assert_eq!(job.next_retry_delay(), None);
    }

    #[test]
    fn fixed_schedule_follows_delivery_intervals() {
        let schedule = RetryPolicy::from_schedule(&[
            Duration::from_secs(1),
            Duration::from_secs(5),
            Duration::from_secs(30),
            Duration::from_secs(120),
            Duration::from_secs(900),
            Duration::from_secs(3600),
            Duration::from_secs(21600),
        ]);
        assert_eq!(schedule.max_attempts(), 8);

        let mut job =
            Job::new("webhook-delivery", serde_json::json!({})).with_retry_schedule(schedule);
        job.attempts_made = 1;
        assert_eq!(job.next_retry_delay(), Some(Duration::from_secs(1)));
        job.attempts_made = 7;
        assert_eq!(job.next_retry_delay(), Some(Duration::from_secs(21600)));
        job.attempts_made = 8;
        assert_eq!(job.next_retry_delay(), None);
    }

    #[test]
    fn job_envelope_round_trips_through_json() {
        let job = Job::new("webhook-processing", serde_json::json!({"webhook_log_id": "x"}));
        let serialized = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&serialized).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.queue, "webhook-processing");
        assert_eq!(parsed.attempts_made, 0);
    }
}
