//! Storage error types

use thiserror::Error;

/// Result type alias for repository operations
pub type DbResult<T> = Result<T, DatabaseError>;

/// Errors produced by the storage layer
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("database error: {source}")]
    Sqlx {
        #[from]
        source: sqlx::Error,
    },

    #[error("redis error: {source}")]
    Redis {
        #[from]
        source: redis::RedisError,
    },

    /// A stored value could not be decoded into its domain type
    #[error("failed to decode column {column}: {reason}")]
    Decode { column: &'static str, reason: String },

    #[error("{resource} not found")]
    NotFound { resource: String },

    #[error("migration error: {source}")]
    Migration {
        #[from]
        source: sqlx::migrate::MigrateError,
    },
}

impl DatabaseError {
    pub fn decode(column: &'static str, reason: impl ToString) -> Self {
        Self::Decode {
            column,
            reason: reason.to_string(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Whether the unique-key constraint fired
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Self::Sqlx {
                source: sqlx::Error::Database(db_err),
            } => db_err.code().as_deref() == Some("23505"),
            _ => false,
        }
    }
}
