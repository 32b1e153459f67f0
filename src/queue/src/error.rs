//! Error types for the queue substrate

use thiserror::Error;

/// Result type alias for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors produced by the queue substrate, rate limiter and circuit breaker
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis error: {source}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("job {job_id} not found in queue {queue}")]
    JobNotFound { queue: String, job_id: String },

    #[error("rate limit exceeded for {bucket} after waiting {waited_ms}ms")]
    RateLimited { bucket: String, waited_ms: u64 },

    #[error("circuit breaker open for {dependency}")]
    CircuitOpen { dependency: String },
}
