//! Ingestion pipeline for provider billing webhooks
//!
//! Signature verification, normalization into canonical events, identity
//! and product resolution, idempotent persistence, and the hand-off to the
//! detection and entitlement engines. Backfill feeds the same pipeline
//! through a trusted entry point that skips signature verification.

pub mod error;
pub mod identity;
pub mod normalizers;
pub mod pipeline;
pub mod proxy;

pub use error::{IngestionError, IngestionResult};
pub use identity::IdentityResolver;
pub use normalizers::{ConnectionContext, InboundWebhook, Normalizer, normalizer_for};
pub use pipeline::{IngestionPipeline, PipelineReport};
pub use proxy::AppleWebhookProxy;
