//! Storage layer for the RevBack platform
//!
//! PostgreSQL hosts all tenant data; Redis hosts queues, rate-limiter
//! buckets and backfill progress. Every repository method on a tenant-owned
//! table takes `org_id` and includes it in the query predicate — there is no
//! code path that reads or writes another tenant's rows.

pub mod connections;
pub mod error;
pub mod repositories;

pub use connections::{connect_postgres, connect_redis, run_migrations};
pub use error::{DatabaseError, DbResult};
pub use repositories::Repositories;

use sqlx::PgPool;

/// Handle bundling the connection pool and all repositories
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    repositories: Repositories,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self {
            repositories: Repositories::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn repos(&self) -> &Repositories {
        &self.repositories
    }
}
