//! Redis connection management for the queue/KV substrate

use crate::error::DbResult;
use redis::aio::ConnectionManager;
use revback_shared::RedisConfig;
use tracing::info;

/// Build a multiplexed connection manager; reconnects transparently.
pub async fn connect_redis(config: &RedisConfig) -> DbResult<ConnectionManager> {
    let client = redis::Client::open(config.url.as_str())?;
    let manager = ConnectionManager::new(client).await?;
    info!("connected to Redis");
    Ok(manager)
}
