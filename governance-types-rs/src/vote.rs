// governance-types-rs/src/vote.rs
// Reviewer roles, individual votes and the derived council decision.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::GovernanceTypesError;

/// Fixed reviewer roles sitting on the council.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouncilRole {
    /// Checks that a proposal is grounded in observed evidence.
    Analyst,
    /// Checks that a proposal is described well enough to review.
    Reviewer,
    /// Checks risk and blast radius.
    Security,
    /// Checks that a proposal does not weaken safeguards.
    Ethics,
}

impl CouncilRole {
    pub const ALL: [CouncilRole; 4] = [
        CouncilRole::Analyst,
        CouncilRole::Reviewer,
        CouncilRole::Security,
        CouncilRole::Ethics,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CouncilRole::Analyst => "analyst",
            CouncilRole::Reviewer => "reviewer",
            CouncilRole::Security => "security",
            CouncilRole::Ethics => "ethics",
        }
    }
}

impl fmt::Display for CouncilRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CouncilRole {
    type Err = GovernanceTypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CouncilRole::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| GovernanceTypesError::UnknownRole(s.to_string()))
    }
}

/// A single reviewer's verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteKind {
    Approve,
    Reject,
    Abstain,
    RequestChanges,
}

impl VoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            VoteKind::Approve => "approve",
            VoteKind::Reject => "reject",
            VoteKind::Abstain => "abstain",
            VoteKind::RequestChanges => "request_changes",
        }
    }

    /// Lenient parse used for free-form reviewer output.
    pub fn parse_lenient(raw: &str) -> Option<VoteKind> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "approve" | "approved" | "accept" | "yes" => Some(VoteKind::Approve),
            "reject" | "rejected" | "deny" | "no" => Some(VoteKind::Reject),
            "abstain" | "abstained" | "skip" => Some(VoteKind::Abstain),
            "request_changes" | "changes" | "changes_requested" | "revise" => {
                Some(VoteKind::RequestChanges)
            }
            _ => None,
        }
    }
}

impl fmt::Display for VoteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One vote per (proposal, role) per review round. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub proposal_id: String,
    pub role: CouncilRole,
    pub vote: VoteKind,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_changes: Option<Vec<String>>,
}

impl Vote {
    pub fn new(proposal_id: &str, role: CouncilRole, vote: VoteKind, reason: impl Into<String>) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            role,
            vote,
            reason: reason.into(),
            timestamp: Utc::now(),
            suggested_changes: None,
        }
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        if !suggestions.is_empty() {
            self.suggested_changes = Some(suggestions);
        }
        self
    }
}

/// Outcome of one review round. Computed fresh, never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub proposal_id: String,
    pub approved: bool,
    pub reason: String,
    pub votes: Vec<Vote>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_changes: Option<Vec<String>>,
}

impl Decision {
    /// Rejection issued without any vote being cast.
    pub fn rejected(proposal_id: &str, reason: impl Into<String>) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            approved: false,
            reason: reason.into(),
            votes: Vec::new(),
            timestamp: Utc::now(),
            suggested_changes: None,
        }
    }

    /// Build a decision from votes, gathering every suggestion they carry.
    pub fn from_votes(proposal_id: &str, approved: bool, reason: impl Into<String>, votes: Vec<Vote>) -> Self {
        let suggestions: Vec<String> = votes
            .iter()
            .filter_map(|v| v.suggested_changes.as_ref())
            .flatten()
            .cloned()
            .collect();

        Self {
            proposal_id: proposal_id.to_string(),
            approved,
            reason: reason.into(),
            votes,
            timestamp: Utc::now(),
            suggested_changes: if suggestions.is_empty() {
                None
            } else {
                Some(suggestions)
            },
        }
    }
}
