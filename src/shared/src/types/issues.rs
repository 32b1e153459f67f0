//! Issue types produced by the detection engine

use super::core::UnknownVariant;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Operator-facing severity of a detected issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Critical,
}

impl IssueSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IssueSeverity {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(UnknownVariant::new("issue severity", other)),
        }
    }
}

/// Triage status of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    #[default]
    Open,
    Acknowledged,
    Resolved,
    Dismissed,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }
}

impl FromStr for IssueStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            "dismissed" => Ok(Self::Dismissed),
            other => Err(UnknownVariant::new("issue status", other)),
        }
    }
}

/// Whether a detection used billing data alone or app-verified access reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DetectionTier {
    #[default]
    BillingOnly,
    AppVerified,
}

impl DetectionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BillingOnly => "billing_only",
            Self::AppVerified => "app_verified",
        }
    }
}

impl FromStr for DetectionTier {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "billing_only" => Ok(Self::BillingOnly),
            "app_verified" => Ok(Self::AppVerified),
            other => Err(UnknownVariant::new("detection tier", other)),
        }
    }
}

/// A detector's raw finding, before persistence and de-duplication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedIssue {
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_revenue_cents: Option<i64>,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub evidence: Value,
    #[serde(default)]
    pub detection_tier: DetectionTier,
}

/// Persisted anomaly record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: Uuid,
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub issue_type: String,
    pub severity: IssueSeverity,
    pub status: IssueStatus,
    pub confidence: f64,
    pub estimated_revenue_cents: Option<i64>,
    pub detector_id: String,
    pub detection_tier: DetectionTier,
    pub evidence: Value,
    pub title: String,
    pub description: String,
    pub resolution: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_info_below_critical() {
        assert!(IssueSeverity::Info < IssueSeverity::Warning);
        assert!(IssueSeverity::Warning < IssueSeverity::Critical);
    }

    #[test]
    fn status_round_trips() {
        for status in [
            IssueStatus::Open,
            IssueStatus::Acknowledged,
            IssueStatus::Resolved,
            IssueStatus::Dismissed,
        ] {
            assert_eq!(status.as_str().parse::<IssueStatus>().unwrap(), status);
        }
    }
}
