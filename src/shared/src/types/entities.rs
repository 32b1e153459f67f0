//! Tenant-scoped entity types
//!
//! Every entity except [`Organization`] carries its owning `org_id`; the
//! repositories in `revback-database` require it on every query, which is
//! what makes cross-tenant access impossible by construction.

use super::core::{BillingSource, IdType, UnknownVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

/// Tenant root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    /// URL-safe, unique across the deployment; webhook endpoints key on it
    pub slug: String,
    pub name: String,
    pub settings: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// API caller credential. Only the SHA-256 hash of the secret is stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// First characters of the secret, for display in the dashboard
    pub key_prefix: String,
    pub scopes: Option<Vec<String>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Whether the key is currently usable
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.revoked_at.is_some() {
            return false;
        }
        match self.expires_at {
            Some(expiry) => expiry > now,
            None => true,
        }
    }

    /// Scope check; a key with no scope list has every scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        match &self.scopes {
            Some(scopes) => scopes.iter().any(|s| s == scope),
            None => true,
        }
    }
}

/// Provider sync status on a billing connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Never,
    InProgress,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant::new("sync status", other)),
        }
    }
}

/// Per-tenant per-provider credentials. At most one per (org, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConnection {
    pub id: Uuid,
    pub org_id: Uuid,
    pub source: BillingSource,
    /// Ciphertext, `v1|iv|tag|ct` base64 format; never plaintext at rest
    #[serde(skip_serializing)]
    pub credentials: String,
    #[serde(skip_serializing)]
    pub webhook_secret: Option<String>,
    pub active: bool,
    pub last_webhook_at: Option<DateTime<Utc>>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub sync_status: SyncStatus,
    /// Apple only: customer's original notification URL for proxy forwarding
    pub original_notification_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical subscription product; auto-created on first reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    /// Map of source → provider-side product id
    pub external_ids: Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Canonical end-user within a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub org_id: Uuid,
    pub external_user_id: Option<String>,
    pub email: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A provider-issued identifier bound to a user.
/// (org_id, source, external_id) is unique within the tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub source: BillingSource,
    pub id_type: IdType,
    pub external_id: String,
    pub created_at: DateTime<Utc>,
}

/// Processing status of an inbound webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    #[default]
    Received,
    Queued,
    Processed,
    Skipped,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Queued => "queued",
            Self::Processed => "processed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "received" => Ok(Self::Received),
            "queued" => Ok(Self::Queued),
            "processed" => Ok(Self::Processed),
            "skipped" => Ok(Self::Skipped),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownVariant::new("processing status", other)),
        }
    }
}

/// Log row for every inbound provider webhook; raw body retained 90 days
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub source: BillingSource,
    pub external_event_id: Option<String>,
    pub processing_status: ProcessingStatus,
    /// Outbound proxy forwarding result, where applicable
    pub http_status: Option<i32>,
    pub error: Option<String>,
    pub headers: Option<Value>,
    pub body: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// A customer-app report of whether an end-user had access at a point in time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessCheck {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Uuid,
    pub product_id: Option<Uuid>,
    pub has_access: bool,
    pub checked_at: DateTime<Utc>,
    pub metadata: Value,
}

/// Alert delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Slack,
    Email,
    Webhook,
    Pagerduty,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Email => "email",
            Self::Webhook => "webhook",
            Self::Pagerduty => "pagerduty",
        }
    }
}

impl FromStr for AlertChannel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "slack" => Ok(Self::Slack),
            "email" => Ok(Self::Email),
            "webhook" => Ok(Self::Webhook),
            "pagerduty" => Ok(Self::Pagerduty),
            other => Err(UnknownVariant::new("alert channel", other)),
        }
    }
}

/// Per-channel alert dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfiguration {
    pub id: Uuid,
    pub org_id: Uuid,
    pub channel: AlertChannel,
    pub enabled: bool,
    /// Channel-specific target: Slack webhook URL, email address,
    /// customer endpoint URL, PagerDuty routing key
    pub target: String,
    /// Minimum severity that triggers dispatch
    pub severity_filter: super::issues::IssueSeverity,
    /// When set, only these issue types dispatch
    pub issue_types: Option<Vec<String>>,
    /// Webhook channel only; generated server-side, revealed once
    #[serde(skip_serializing)]
    pub signing_secret: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one outbound alert attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDeliveryLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub alert_config_id: Uuid,
    pub issue_id: Uuid,
    pub channel: AlertChannel,
    pub success: bool,
    pub http_status: Option<i32>,
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Append-only record of a mutating administrative action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub org_id: Uuid,
    pub actor_type: String,
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// Backfill progress phases published to the KV store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Counting,
    ImportingSubscriptions,
    ImportingEvents,
    Completed,
    Failed,
}

/// Resumable backfill progress, stored under `backfill:<source>:<org_id>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillProgress {
    pub status: BackfillStatus,
    pub total_estimated: Option<u64>,
    pub subscriptions_processed: u64,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

impl BackfillProgress {
    pub fn started(now: DateTime<Utc>) -> Self {
        Self {
            status: BackfillStatus::Counting,
            total_estimated: None,
            subscriptions_processed: 0,
            errors: Vec::new(),
            started_at: now,
            duration_ms: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        !matches!(
            self.status,
            BackfillStatus::Completed | BackfillStatus::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn api_key_expiry_and_revocation() {
        let now = Utc::now();
        let mut key = ApiKey {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "ci".into(),
            key_hash: "abc".into(),
            key_prefix: "rev_12ab".into(),
            scopes: None,
            expires_at: Some(now + Duration::hours(1)),
            revoked_at: None,
            created_at: now,
        };
        assert!(key.is_active(now));
        assert!(!key.is_active(now + Duration::hours(2)));
        key.revoked_at = Some(now);
        assert!(!key.is_active(now));
    }

    #[test]
    fn api_key_scopes_default_to_all() {
        let now = Utc::now();
        let mut key = ApiKey {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            name: "ci".into(),
            key_hash: "abc".into(),
            key_prefix: "rev_12ab".into(),
            scopes: None,
            expires_at: None,
            revoked_at: None,
            created_at: now,
        };
        assert!(key.has_scope("issues:write"));
        key.scopes = Some(vec!["issues:read".into()]);
        assert!(key.has_scope("issues:read"));
        assert!(!key.has_scope("issues:write"));
    }

    #[test]
    fn backfill_progress_phases() {
        let mut progress = BackfillProgress::started(Utc::now());
        assert!(progress.is_in_progress());
        progress.status = BackfillStatus::Completed;
        assert!(!progress.is_in_progress());
    }
}
