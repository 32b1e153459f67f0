//! Per-process circuit breaker
//!
//! One breaker wraps each external dependency (provider APIs, customer
//! webhook endpoints). State is per-process: every server instance observes
//! the dependency's failures independently within seconds, so there is no
//! shared store behind it.

use crate::error::{QueueError, QueueResult};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Thresholds for a breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Concurrent probes allowed while half-open
    pub half_open_max_probes: u32,
    /// Time the circuit stays open before probing
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            half_open_max_probes: 1,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit breaker for one external dependency
pub struct CircuitBreaker {
    dependency: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    failure_count: AtomicU32,
    half_open_probes: AtomicU32,
    last_failure_at: RwLock<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(dependency: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            dependency: dependency.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            half_open_probes: AtomicU32::new(0),
            last_failure_at: RwLock::new(None),
        }
    }

    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    pub fn state(&self) -> CircuitState {
        *self.state.read()
    }

    /// Whether a call may proceed right now. Transitions open → half-open
    /// once the reset timeout has elapsed; half-open admits a bounded number
    /// of probes.
    fn admit(&self) -> bool {
        let state = *self.state.read();
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = self
                    .last_failure_at
                    .read()
                    .map(|t| t.elapsed() >= self.config.reset_timeout)
                    .unwrap_or(false);
                if elapsed {
                    *self.state.write() = CircuitState::HalfOpen;
                    self.half_open_probes.store(0, Ordering::SeqCst);
                    debug!(dependency = %self.dependency, "circuit half-open, probing");
                    self.admit_probe()
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => self.admit_probe(),
        }
    }

    fn admit_probe(&self) -> bool {
        let probes = self.half_open_probes.fetch_add(1, Ordering::SeqCst);
        if probes < self.config.half_open_max_probes {
            true
        } else {
            self.half_open_probes.fetch_sub(1, Ordering::SeqCst);
            false
        }
    }

    fn on_success(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        let mut state = self.state.write();
        if *state == CircuitState::HalfOpen {
            debug!(dependency = %self.dependency, "circuit closed after successful probe");
            *state = CircuitState::Closed;
        }
    }

    fn on_failure(&self) {
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_failure_at.write() = Some(Instant::now());
        let mut state = self.state.write();
        match *state {
            CircuitState::HalfOpen => {
                warn!(dependency = %self.dependency, "probe failed, circuit re-opened");
                *state = CircuitState::Open;
            }
            CircuitState::Closed if failures >= self.config.failure_threshold => {
                warn!(
                    dependency = %self.dependency,
                    failures, "failure threshold reached, circuit opened"
                );
                *state = CircuitState::Open;
            }
            _ => {}
        }
    }

    /// Run `fut` under the breaker. Rejected immediately with
    /// [`QueueError::CircuitOpen`] when the circuit is open.
    pub async fn execute<T, E, F>(&self, fut: F) -> QueueResult<Result<T, E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        if !self.admit() {
            return Err(QueueError::CircuitOpen {
                dependency: self.dependency.clone(),
            });
        }
        let was_half_open = self.state() == CircuitState::HalfOpen;
        let result = fut.await;
        if was_half_open {
            self.half_open_probes.fetch_sub(1, Ordering::SeqCst);
        }
        match &result {
            Ok(_) => self.on_success(),
            Err(_) => self.on_failure(),
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "stripe-api",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                half_open_max_probes: 1,
                reset_timeout: reset,
            },
        )
    }

    async fn fail(b: &CircuitBreaker) {
        let _ = b.execute::<(), _, _>(async { Err::<(), &str>("boom") }).await;
    }

    async fn succeed(b: &CircuitBreaker) -> QueueResult<Result<(), &'static str>> {
        b.execute(async { Ok::<(), &str>(()) }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let b = breaker(3, Duration::from_secs(60));
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b).await;
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Closed);
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        let rejected = b.execute(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(rejected, Err(QueueError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn success_resets_failure_count() {
        let b = breaker(3, Duration::from_secs(60));
        fail(&b).await;
        fail(&b).await;
        succeed(&b).await.unwrap().unwrap();
        fail(&b).await;
        fail(&b).await;
        // count restarted after the success, so still closed
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_closes_on_success() {
        let b = breaker(1, Duration::from_millis(10));
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        succeed(&b).await.unwrap().unwrap();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_reopens_on_failure() {
        let b = breaker(1, Duration::from_millis(10));
        fail(&b).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        fail(&b).await;
        assert_eq!(b.state(), CircuitState::Open);
    }
}
