//! Error handling for the ingestion service
//!
//! The retryability split matters operationally: signature failures are
//! deterministic and must never be retried, while storage and upstream
//! errors go back to the queue.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type IngestionResult<T> = Result<T, IngestionError>;

/// Errors raised while verifying, normalizing and persisting webhooks
#[derive(Error, Debug)]
pub enum IngestionError {
    /// Signature verification failed; deterministic, never retried
    #[error("signature verification failed for {provider}: {reason}")]
    SignatureVerification { provider: String, reason: String },

    /// The payload could not be parsed as the provider's wire format
    #[error("invalid payload from {provider}: {reason}")]
    InvalidPayload { provider: String, reason: String },

    /// No billing connection configured for (org, source)
    #[error("no {provider} connection configured for organization")]
    MissingConnection { provider: String },

    #[error("credential error: {0}")]
    Credentials(String),

    #[error("database error: {source}")]
    Database {
        #[from]
        source: revback_database::DatabaseError,
    },

    #[error("provider API error for {service}: {status_code} - {message}")]
    ProviderApi {
        service: String,
        status_code: u16,
        message: String,
    },

    #[error("HTTP client error: {source}")]
    HttpClient {
        #[from]
        source: reqwest::Error,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("queue error: {source}")]
    Queue {
        #[from]
        source: revback_queue::QueueError,
    },

    #[error("entitlement engine error: {source}")]
    Entitlements {
        #[from]
        source: revback_entitlements::EntitlementEngineError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl IngestionError {
    pub fn signature<S1: Into<String>, S2: Into<String>>(provider: S1, reason: S2) -> Self {
        Self::SignatureVerification {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_payload<S1: Into<String>, S2: Into<String>>(provider: S1, reason: S2) -> Self {
        Self::InvalidPayload {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_connection(provider: impl Into<String>) -> Self {
        Self::MissingConnection {
            provider: provider.into(),
        }
    }

    pub fn provider_api<S1: Into<String>, S2: Into<String>>(
        service: S1,
        status_code: u16,
        message: S2,
    ) -> Self {
        Self::ProviderApi {
            service: service.into(),
            status_code,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether the queue should retry a job that failed with this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::SignatureVerification { .. }
            | Self::InvalidPayload { .. }
            | Self::MissingConnection { .. }
            | Self::Credentials(_)
            | Self::Serialization { .. } => false,
            Self::ProviderApi { status_code, .. } => *status_code >= 500,
            Self::Database { .. }
            | Self::HttpClient { .. }
            | Self::Queue { .. }
            | Self::Entitlements { .. }
            | Self::Internal(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_failures_are_permanent() {
        assert!(!IngestionError::signature("stripe", "bad v1").is_retryable());
        assert!(!IngestionError::invalid_payload("google", "not base64").is_retryable());
        assert!(!IngestionError::missing_connection("apple").is_retryable());
    }

    #[test]
    fn upstream_5xx_is_retryable_4xx_is_not() {
        assert!(IngestionError::provider_api("google-play", 503, "unavailable").is_retryable());
        assert!(!IngestionError::provider_api("google-play", 404, "gone").is_retryable());
    }
}
