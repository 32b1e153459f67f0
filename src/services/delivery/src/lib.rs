//! Outbound delivery
//!
//! Fan-out of issue lifecycle events: the alert dispatcher posts to
//! synchronous channels (Slack, email, PagerDuty) and enqueues
//! webhook-delivery jobs; the outbound worker signs and POSTs customer
//! webhooks on a fixed retry schedule with dead-letter routing.

pub mod alerts;
pub mod error;
pub mod outbound;
pub mod payload;

pub use alerts::AlertDispatcher;
pub use error::{DeliveryError, DeliveryResult};
pub use outbound::{delivery_retry_schedule, OutboundDelivery};
pub use payload::{generate_signing_secret, OutboundEnvelope, SIGNATURE_HEADER};
