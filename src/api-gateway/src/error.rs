//! API error handling
//!
//! Every failure reaching a caller is JSON `{error, details?}` with a REST
//! status code. Stack traces and internal messages never leak: internal
//! errors log the cause and answer with a generic body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },

    #[error("{0}")]
    Unauthorized(String),

    #[error("insufficient scope: {0} required")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("rate limit exceeded")]
    RateLimited,

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

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Database { .. } | Self::Queue { .. } | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<revback_ingestion::IngestionError> for ApiError {
    fn from(e: revback_ingestion::IngestionError) -> Self {
        use revback_ingestion::IngestionError as E;
        match e {
            E::SignatureVerification { .. } => Self::Unauthorized("invalid signature".into()),
            E::InvalidPayload { reason, .. } => Self::validation(reason),
            E::MissingConnection { provider } => {
                Self::NotFound(format!("{provider} connection"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<revback_delivery::DeliveryError> for ApiError {
    fn from(e: revback_delivery::DeliveryError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<revback_backfill::BackfillError> for ApiError {
    fn from(e: revback_backfill::BackfillError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<revback_detection::DetectionError> for ApiError {
    fn from(e: revback_detection::DetectionError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<revback_security::SecurityError> for ApiError {
    fn from(e: revback_security::SecurityError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let error_message = if status.is_server_error() {
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut body = json!({ "error": error_message });
        if let Self::Validation {
            details: Some(details),
            ..
        } = &self
        {
            body["details"] = details.clone();
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_rest_conventions() {
        assert_eq!(ApiError::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::unauthorized("x").status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("issues:write".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ApiError::not_found("issue").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ApiError::internal("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn signature_failures_map_to_401() {
        let e: ApiError =
            revback_ingestion::IngestionError::signature("stripe", "bad digest").into();
        assert_eq!(e.status_code(), StatusCode::UNAUTHORIZED);
    }
}
