//! Shared domain types and configuration for the RevBack platform
//!
//! Every service crate depends on this one for the canonical event
//! vocabulary, entitlement states, issue shapes and the typed platform
//! configuration loaded from the environment.

pub mod config;
pub mod types;

pub use config::{
    AppEnv, DatabaseConfig, EncryptionConfig, PlatformConfig, RedisConfig, ServerConfig,
    SmtpConfig,
};
pub use types::*;
