//! Cross-process token-bucket rate limiter
//!
//! Buckets live in Redis so every server instance draws from the same
//! budget. The check-and-update runs as a single Lua script, which is what
//! makes it correct under contention; there is no in-process locking.

use crate::error::{QueueError, QueueResult};
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::Script;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Atomic refill + consume. Returns `{allowed, remaining, wait_ms}`.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local max_tokens = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local refill_interval_ms = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])
local now_ms = tonumber(ARGV[5])

local bucket = redis.call('HMGET', key, 'tokens', 'updated_at')
local tokens = tonumber(bucket[1])
local updated = tonumber(bucket[2])
if tokens == nil then
  tokens = max_tokens
  updated = now_ms
end

local elapsed = now_ms - updated
if elapsed < 0 then elapsed = 0 end
local refills = math.floor(elapsed / refill_interval_ms)
if refills > 0 then
  tokens = math.min(max_tokens, tokens + refills * refill_rate)
  updated = updated + refills * refill_interval_ms
end

local allowed = 0
local wait_ms = 0
if tokens >= requested then
  tokens = tokens - requested
  allowed = 1
else
  local deficit = requested - tokens
  local intervals = math.ceil(deficit / refill_rate)
  wait_ms = intervals * refill_interval_ms - (now_ms - updated)
  if wait_ms < 0 then wait_ms = 0 end
end

redis.call('HMSET', key, 'tokens', tokens, 'updated_at', updated)
redis.call('PEXPIRE', key, math.max(refill_interval_ms * 10, 60000))
return {allowed, tokens, wait_ms}
"#;

/// Bucket parameters, keyed by a logical name such as `apple-api`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub name: String,
    pub max_tokens: u64,
    /// Tokens added per refill interval
    pub refill_rate: u64,
    pub refill_interval_ms: u64,
}

impl RateLimiterConfig {
    pub fn new(name: impl Into<String>, max_tokens: u64, refill_rate: u64, interval: Duration) -> Self {
        Self {
            name: name.into(),
            max_tokens,
            refill_rate,
            refill_interval_ms: interval.as_millis() as u64,
        }
    }
}

/// Outcome of a consume attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining_tokens: u64,
    /// Suggested wait before the tokens become available; zero when allowed
    pub wait_ms: u64,
}

/// Token bucket handle
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    conn: ConnectionManager,
    script: Script,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, conn: ConnectionManager) -> Self {
        Self {
            config,
            conn,
            script: Script::new(TOKEN_BUCKET_SCRIPT),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    fn bucket_key(&self) -> String {
        format!("rbrl:{}", self.config.name)
    }

    /// Try to take `n` tokens without waiting
    pub async fn try_consume(&self, n: u64) -> QueueResult<RateLimitDecision> {
        let mut conn = self.conn.clone();
        let (allowed, remaining, wait_ms): (i64, u64, u64) = self
            .script
            .key(self.bucket_key())
            .arg(self.config.max_tokens)
            .arg(self.config.refill_rate)
            .arg(self.config.refill_interval_ms)
            .arg(n)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        Ok(RateLimitDecision {
            allowed: allowed == 1,
            remaining_tokens: remaining,
            wait_ms,
        })
    }

    /// Take `n` tokens, cooperatively sleeping up to `max_wait`.
    pub async fn consume(&self, n: u64, max_wait: Duration) -> QueueResult<()> {
        let deadline = tokio::time::Instant::now() + max_wait;
        let mut waited_ms: u64 = 0;
        loop {
            let decision = self.try_consume(n).await?;
            if decision.allowed {
                return Ok(());
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(QueueError::RateLimited {
                    bucket: self.config.name.clone(),
                    waited_ms,
                });
            }
            let remaining_budget = deadline - now;
            let sleep_for =
                Duration::from_millis(decision.wait_ms.max(10)).min(remaining_budget);
            debug!(
                bucket = %self.config.name,
                wait_ms = sleep_for.as_millis() as u64,
                "rate limited, sleeping"
            );
            waited_ms += sleep_for.as_millis() as u64;
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_converts_interval_to_millis() {
        let config = RateLimiterConfig::new("apple-api", 10, 10, Duration::from_secs(1));
        assert_eq!(config.refill_interval_ms, 1_000);
    }

    #[test]
    fn decision_serializes_for_progress_endpoints() {
        let decision = RateLimitDecision {
            allowed: false,
            remaining_tokens: 0,
            wait_ms: 450,
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["allowed"], false);
        assert_eq!(json["wait_ms"], 450);
    }
}
