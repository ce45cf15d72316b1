// governance-types-rs/src/proposal.rs
// Change proposals and their review/apply lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Risk classification attached to every proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    Low,
    Medium,
    High,
}

impl Risk {
    pub fn as_str(self) -> &'static str {
        match self {
            Risk::Low => "low",
            Risk::Medium => "medium",
            Risk::High => "high",
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of behavior a proposal changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    PromptRefinement,
    ConfigChange,
    RuleAddition,
    WorkflowChange,
    CodePatch,
}

impl ProposalType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalType::PromptRefinement => "prompt_refinement",
            ProposalType::ConfigChange => "config_change",
            ProposalType::RuleAddition => "rule_addition",
            ProposalType::WorkflowChange => "workflow_change",
            ProposalType::CodePatch => "code_patch",
        }
    }
}

impl fmt::Display for ProposalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proposal lifecycle.
///
/// ```text
/// pending -> approved | rejected
/// approved -> applied | failed
/// applied -> rolled_back
/// ```
///
/// `rejected`, `failed` and `rolled_back` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
    Applied,
    Failed,
    RolledBack,
}

impl ProposalStatus {
    /// Whether `self -> next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Pending, Rejected)
                | (Approved, Applied)
                | (Approved, Failed)
                | (Applied, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProposalStatus::Rejected | ProposalStatus::Failed | ProposalStatus::RolledBack
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Applied => "applied",
            ProposalStatus::Failed => "failed",
            ProposalStatus::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle move.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("proposal {proposal_id}: cannot move from {from} to {to}")]
pub struct TransitionError {
    pub proposal_id: String,
    pub from: ProposalStatus,
    pub to: ProposalStatus,
}

/// A candidate change plus review metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: String,
    #[serde(rename = "type")]
    pub proposal_type: ProposalType,
    pub risk: Risk,
    pub title: String,
    pub description: String,
    /// Generator-specific body. The directory applier reads `proposal_dir`.
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_signal_id: Option<String>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    /// Opaque data needed to undo an application (e.g. the applied record id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_data: Option<serde_json::Value>,
}

impl Proposal {
    pub fn new(
        proposal_type: ProposalType,
        risk: Risk,
        title: impl Into<String>,
        description: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            proposal_type,
            risk,
            title: title.into(),
            description: description.into(),
            payload,
            source_signal_id: None,
            status: ProposalStatus::Pending,
            created_at: now,
            updated_at: now,
            reviewed_by: None,
            review_notes: None,
            rollback_data: None,
        }
    }

    pub fn with_source_signal(mut self, signal_id: impl Into<String>) -> Self {
        self.source_signal_id = Some(signal_id.into());
        self
    }

    /// Advance the lifecycle, refusing any move outside the graph.
    pub fn transition_to(&mut self, next: ProposalStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                proposal_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record a review outcome (`pending -> approved|rejected`) with attribution.
    pub fn record_review(
        &mut self,
        approved: bool,
        reviewed_by: impl Into<String>,
        notes: impl Into<String>,
    ) -> Result<(), TransitionError> {
        let next = if approved {
            ProposalStatus::Approved
        } else {
            ProposalStatus::Rejected
        };
        self.transition_to(next)?;
        self.reviewed_by = Some(reviewed_by.into());
        self.review_notes = Some(notes.into());
        Ok(())
    }
}
