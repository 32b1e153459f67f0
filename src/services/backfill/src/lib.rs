//! Backfill engine
//!
//! Per-provider historical import: streams subscriptions from the provider
//! API under the rate limiter and circuit breaker, synthesizes raw events
//! shaped like that provider's webhooks, and feeds them through the
//! pipeline's trusted entry point. Progress is published to Redis under
//! `backfill:<source>:<org_id>` and is resumable by inspection.

pub mod apple;
pub mod engine;
pub mod error;
pub mod google;
pub mod progress;
pub mod recurly;
pub mod stripe;

pub use engine::{BackfillContext, BackfillRunner};
pub use error::{BackfillError, BackfillResult};
pub use progress::ProgressStore;
