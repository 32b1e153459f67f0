//! Error types for security operations

use thiserror::Error;

/// Result type alias for security operations
pub type SecurityResult<T> = Result<T, SecurityError>;

/// Errors produced by encryption, key handling and signature verification
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("invalid master key: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed under every configured key slot
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("signature verification failed: {0}")]
    SignatureInvalid(String),

    #[error("serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },
}
