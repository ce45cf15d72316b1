// self-healing-rs/src/model.rs
// Tracked applications and the rollback audit trail.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use governance_types::PerformanceMetrics;

use crate::degradation::DegradationResult;

/// ```text
/// monitoring -> effective | degraded | needs-review | rolled-back
/// degraded | needs-review -> rolled-back   (manual)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApplicationStatus {
    Monitoring,
    Effective,
    Degraded,
    RolledBack,
    NeedsReview,
}

impl ApplicationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApplicationStatus::Monitoring => "monitoring",
            ApplicationStatus::Effective => "effective",
            ApplicationStatus::Degraded => "degraded",
            ApplicationStatus::RolledBack => "rolled-back",
            ApplicationStatus::NeedsReview => "needs-review",
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalApplication {
    pub id: String,
    pub proposal_id: String,
    pub changed_files: Vec<String>,
    pub before_metrics: PerformanceMetrics,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_metrics: Option<PerformanceMetrics>,
    pub applied_at: DateTime<Utc>,
    pub status: ApplicationStatus,
    pub rolled_back: bool,
    /// Changed file -> backup copy, relative to the applied-record store.
    #[serde(default)]
    pub backup_paths: BTreeMap<String, String>,
    /// Changed files that did not exist beforehand; reverting deletes them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub created_files: Vec<String>,
    /// Applied record that can revert this application as a unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_evaluation: Option<DegradationResult>,
}

impl ProposalApplication {
    pub fn new(
        proposal_id: impl Into<String>,
        changed_files: Vec<String>,
        before_metrics: PerformanceMetrics,
        applied_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            proposal_id: proposal_id.into(),
            changed_files,
            before_metrics,
            after_metrics: None,
            applied_at,
            status: ApplicationStatus::Monitoring,
            rolled_back: false,
            backup_paths: BTreeMap::new(),
            created_files: Vec::new(),
            applied_record_id: None,
            last_evaluation: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackResult {
    Success,
    Partial,
    Failed,
}

impl RollbackResult {
    pub fn as_str(self) -> &'static str {
        match self {
            RollbackResult::Success => "success",
            RollbackResult::Partial => "partial",
            RollbackResult::Failed => "failed",
        }
    }
}

/// Immutable audit entry for one rollback attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackAction {
    pub id: String,
    pub application_id: String,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    pub restored_files: Vec<String>,
    pub automatic: bool,
    pub triggered_by: String,
    pub result: RollbackResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
