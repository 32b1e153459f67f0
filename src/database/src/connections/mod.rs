//! Connection management for PostgreSQL and Redis

mod postgresql;
mod redis_conn;

pub use postgresql::{connect_postgres, run_migrations};
pub use redis_conn::connect_redis;
