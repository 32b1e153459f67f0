//! Work-queueing and scheduling substrate
//!
//! Named durable queues on Redis with delayed delivery, exponential-backoff
//! retries, cron-repeatable jobs and dead-letter routing; a cross-process
//! token-bucket rate limiter; and a per-process circuit breaker wrapping
//! each external dependency.

pub mod circuit_breaker;
pub mod error;
pub mod job;
pub mod queue;
pub mod rate_limiter;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{QueueError, QueueResult};
pub use job::{Job, JobError, JobOutcome, JobResult, RetryPolicy};
pub use queue::{Queue, QueueStats, Worker, WorkerConfig, JobHandler};
pub use rate_limiter::{RateLimitDecision, RateLimiter, RateLimiterConfig};
