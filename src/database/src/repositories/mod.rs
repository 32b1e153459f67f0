//! Tenant-scoped repositories
//!
//! One repository per entity family. Methods on tenant-owned tables take
//! `org_id` and always include it in the SQL predicate; the only exceptions
//! are the retention sweeps, which are deployment-wide maintenance
//! operations driven by the data-retention queue.

mod access_checks;
mod alerts;
mod api_keys;
mod audit;
mod billing_connections;
mod entitlements;
mod events;
mod issues;
mod organizations;
mod products;
mod users;
mod webhook_logs;

pub use access_checks::AccessCheckRepository;
pub use alerts::AlertRepository;
pub use api_keys::ApiKeyRepository;
pub use audit::AuditRepository;
pub use billing_connections::BillingConnectionRepository;
pub use entitlements::{EntitlementRepository, EntitlementUpdate, StateCounts};
pub use events::{EventRepository, NewCanonicalEvent, RevenueByType};
pub use issues::{IssueRepository, IssueFilter, OpenIssueTotals};
pub use organizations::OrganizationRepository;
pub use products::ProductRepository;
pub use users::{MergeOutcome, UserRepository};
pub use webhook_logs::WebhookLogRepository;

use crate::error::{DatabaseError, DbResult};
use sqlx::PgPool;
use std::fmt::Display;
use std::str::FromStr;

/// All repositories over one pool
#[derive(Clone)]
pub struct Repositories {
    pub organizations: OrganizationRepository,
    pub api_keys: ApiKeyRepository,
    pub connections: BillingConnectionRepository,
    pub products: ProductRepository,
    pub users: UserRepository,
    pub events: EventRepository,
    pub entitlements: EntitlementRepository,
    pub issues: IssueRepository,
    pub webhook_logs: WebhookLogRepository,
    pub access_checks: AccessCheckRepository,
    pub alerts: AlertRepository,
    pub audit: AuditRepository,
}

impl Repositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            organizations: OrganizationRepository::new(pool.clone()),
            api_keys: ApiKeyRepository::new(pool.clone()),
            connections: BillingConnectionRepository::new(pool.clone()),
            products: ProductRepository::new(pool.clone()),
            users: UserRepository::new(pool.clone()),
            events: EventRepository::new(pool.clone()),
            entitlements: EntitlementRepository::new(pool.clone()),
            issues: IssueRepository::new(pool.clone()),
            webhook_logs: WebhookLogRepository::new(pool.clone()),
            access_checks: AccessCheckRepository::new(pool.clone()),
            alerts: AlertRepository::new(pool.clone()),
            audit: AuditRepository::new(pool),
        }
    }
}

/// Parse a stored enum string into its domain type
pub(crate) fn parse_enum<T>(column: &'static str, value: &str) -> DbResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e: T::Err| DatabaseError::decode(column, e))
}
