//! Platform configuration
//!
//! Typed configuration shared by every RevBack service, loaded from the
//! environment. Services call [`PlatformConfig::from_env`] once at startup
//! and pass clones of the relevant sections down.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppEnv {
    #[default]
    Development,
    Production,
    Test,
}

impl AppEnv {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl fmt::Display for AppEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => f.write_str("development"),
            Self::Production => f.write_str("production"),
            Self::Test => f.write_str("test"),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            timeout_seconds: 30,
        }
    }
}

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/revback".to_string(),
            max_connections: 20,
            min_connections: 2,
            connect_timeout_seconds: 30,
        }
    }
}

/// Redis configuration for the queue/KV substrate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Master-key configuration for credential encryption.
///
/// Two slots: `current` is used for every write; `previous` is tried on read
/// to support rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// 32 bytes, hex encoded
    pub key_hex: String,
    pub previous_key_hex: Option<String>,
}

/// SMTP transport configuration for email alerts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// Complete platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub env: AppEnv,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub encryption: EncryptionConfig,
    pub smtp: Option<SmtpConfig>,
    pub dashboard_url: String,
}

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

impl PlatformConfig {
    /// Load configuration from the environment.
    ///
    /// `DATABASE_URL`, `REDIS_URL` and `CREDENTIAL_ENCRYPTION_KEY` are
    /// required; everything else has a development default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let env = match optional("APP_ENV").as_deref() {
            Some("production") => AppEnv::Production,
            Some("test") => AppEnv::Test,
            _ => AppEnv::Development,
        };

        let server = ServerConfig {
            host: optional("HTTP_HOST").unwrap_or_else(|| ServerConfig::default().host),
            port: match optional("HTTP_PORT") {
                Some(v) => parsed("HTTP_PORT", v)?,
                None => ServerConfig::default().port,
            },
            timeout_seconds: 30,
        };

        let database = DatabaseConfig {
            url: required("DATABASE_URL")?,
            ..DatabaseConfig::default()
        };

        let redis = RedisConfig {
            url: required("REDIS_URL")?,
        };

        let encryption = EncryptionConfig {
            key_hex: required("CREDENTIAL_ENCRYPTION_KEY")?,
            previous_key_hex: optional("CREDENTIAL_ENCRYPTION_KEY_PREVIOUS"),
        };

        let smtp = match optional("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: match optional("SMTP_PORT") {
                    Some(v) => parsed("SMTP_PORT", v)?,
                    None => 587,
                },
                username: optional("SMTP_USER").unwrap_or_default(),
                password: optional("SMTP_PASS").unwrap_or_default(),
                from: optional("SMTP_FROM").unwrap_or_else(|| "alerts@revback.dev".to_string()),
            }),
            None => None,
        };

        let config = Self {
            env,
            server,
            database,
            redis,
            encryption,
            smtp,
            dashboard_url: optional("DASHBOARD_URL")
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints that `from_env` cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        let key_len = self.encryption.key_hex.len();
        if key_len != 64 {
            return Err(ConfigError::Invalid {
                name: "CREDENTIAL_ENCRYPTION_KEY",
                reason: format!("expected 64 hex characters (32 bytes), got {key_len}"),
            });
        }
        if let Some(prev) = &self.encryption.previous_key_hex {
            if prev.len() != 64 {
                return Err(ConfigError::Invalid {
                    name: "CREDENTIAL_ENCRYPTION_KEY_PREVIOUS",
                    reason: format!("expected 64 hex characters (32 bytes), got {}", prev.len()),
                });
            }
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::Invalid {
                name: "DATABASE_URL",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> PlatformConfig {
        PlatformConfig {
            env: AppEnv::Test,
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            redis: RedisConfig::default(),
            encryption: EncryptionConfig {
                key_hex: "ab".repeat(32),
                previous_key_hex: None,
            },
            smtp: None,
            dashboard_url: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn valid_config_passes_validation() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn short_encryption_key_is_rejected() {
        let mut config = base_config();
        config.encryption.key_hex = "abcd".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn short_previous_key_is_rejected() {
        let mut config = base_config();
        config.encryption.previous_key_hex = Some("beef".to_string());
        assert!(config.validate().is_err());
    }
}
