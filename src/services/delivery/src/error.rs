//! Delivery error types

use thiserror::Error;

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("database error: {source}")]
    Database {
        #[from]
        source: revback_database::DatabaseError,
    },

    #[error("queue error: {source}")]
    Queue {
        #[from]
        source: revback_queue::QueueError,
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

    #[error("email transport error: {0}")]
    Email(String),

    #[error("{resource} not found")]
    NotFound { resource: String },

    /// The customer endpoint answered outside 2xx
    #[error("endpoint returned HTTP {status}")]
    EndpointRejected { status: u16 },
}

impl DeliveryError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}
