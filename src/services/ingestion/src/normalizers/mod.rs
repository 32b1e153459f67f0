//! Provider normalizers
//!
//! One normalizer per billing provider. Each verifies the provider's
//! signature scheme, parses the native wire format and emits zero or more
//! canonical [`NormalizedEvent`]s with identity hints. Unknown native event
//! types degrade gracefully: the normalizer returns an empty list and the
//! webhook is marked skipped, never failed.

pub mod apple;
pub mod google;
pub mod google_play;
pub mod recurly;
pub mod stripe;

pub use apple::AppleNormalizer;
pub use google::GoogleNormalizer;
pub use recurly::RecurlyNormalizer;
pub use stripe::StripeNormalizer;

use crate::error::{IngestionError, IngestionResult};
use async_trait::async_trait;
use revback_shared::{BillingSource, IdentityHint, NormalizedEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A raw webhook as received by the HTTP layer: body plus headers with
/// lowercased names.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InboundWebhook {
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl InboundWebhook {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Per-connection context handed to a normalizer: the decrypted credentials,
/// the configured webhook secret, and the public URL of the receiving
/// endpoint (needed for Google's audience check).
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    pub webhook_secret: Option<String>,
    pub credentials: Option<Value>,
    pub endpoint_url: Option<String>,
}

impl ConnectionContext {
    pub fn secret(&self) -> IngestionResult<&str> {
        self.webhook_secret
            .as_deref()
            .ok_or_else(|| IngestionError::internal("webhook secret required but not configured"))
    }
}

/// The per-provider normalization contract
#[async_trait]
pub trait Normalizer: Send + Sync {
    fn source(&self) -> BillingSource;

    /// Verify the provider's signature over the raw webhook. Failure is
    /// deterministic: the caller returns 401 and never retries.
    async fn verify_signature(
        &self,
        webhook: &InboundWebhook,
        ctx: &ConnectionContext,
    ) -> IngestionResult<()>;

    /// Parse the native payload into canonical events. An unrecognized
    /// native type yields an empty list.
    async fn normalize(
        &self,
        org_id: Uuid,
        webhook: &InboundWebhook,
        ctx: &ConnectionContext,
    ) -> IngestionResult<Vec<NormalizedEvent>>;

    /// Identity hints derivable from a parsed payload without normalizing
    fn extract_identity_hints(&self, payload: &Value) -> Vec<IdentityHint>;
}

/// Look up the normalizer for a webhook source
pub fn normalizer_for(
    source: BillingSource,
    http: reqwest::Client,
) -> Option<Arc<dyn Normalizer>> {
    match source {
        BillingSource::Stripe => Some(Arc::new(StripeNormalizer::new())),
        BillingSource::Apple => Some(Arc::new(AppleNormalizer::new())),
        BillingSource::Google => Some(Arc::new(GoogleNormalizer::new(http))),
        BillingSource::Recurly => Some(Arc::new(RecurlyNormalizer::new())),
        BillingSource::Braintree => None,
    }
}

/// `<source>:<external id>` idempotency key shape shared by the normalizers
pub(crate) fn idempotency_key(source: BillingSource, external_id: &str) -> String {
    format!("{}:{}", source.as_str(), external_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_is_case_insensitive() {
        let webhook = InboundWebhook::new("{}").with_header("Stripe-Signature", "t=1,v1=a");
        assert_eq!(webhook.header("stripe-signature"), Some("t=1,v1=a"));
        assert_eq!(webhook.header("STRIPE-SIGNATURE"), Some("t=1,v1=a"));
        assert_eq!(webhook.header("x-missing"), None);
    }

    #[test]
    fn registry_covers_webhook_sources() {
        let http = reqwest::Client::new();
        for source in BillingSource::webhook_sources() {
            assert!(normalizer_for(*source, http.clone()).is_some());
        }
        assert!(normalizer_for(BillingSource::Braintree, http).is_none());
    }
}
