//! Backfill error types
//!
//! Record-level failures are collected into the progress object and do not
//! stop the run; only the variants marked fatal abort the job.

use thiserror::Error;

pub type BackfillResult<T> = Result<T, BackfillError>;

#[derive(Error, Debug)]
pub enum BackfillError {
    /// Missing or undecryptable credentials; fatal
    #[error("credential error: {0}")]
    Credentials(String),

    /// Provider rejected our authentication; fatal
    #[error("authentication rejected by {provider}: {message}")]
    AuthRejected { provider: String, message: String },

    /// The circuit breaker opened on the provider; fatal for this run
    #[error("queue error: {source}")]
    Queue {
        #[from]
        source: revback_queue::QueueError,
    },

    #[error("no {provider} connection configured")]
    MissingConnection { provider: String },

    #[error("database error: {source}")]
    Database {
        #[from]
        source: revback_database::DatabaseError,
    },

    #[error("redis error: {source}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    #[error("HTTP error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("provider API error for {provider}: {status_code} - {message}")]
    ProviderApi {
        provider: String,
        status_code: u16,
        message: String,
    },
}

impl BackfillError {
    pub fn provider_api(provider: impl Into<String>, status_code: u16, message: impl Into<String>) -> Self {
        let provider = provider.into();
        let message = message.into();
        if status_code == 401 || status_code == 403 {
            Self::AuthRejected { provider, message }
        } else {
            Self::ProviderApi {
                provider,
                status_code,
                message,
            }
        }
    }
}
