//! # Council
//!
//! Consensus engine that turns per-role votes into a single approve/reject
//! [`Decision`] for a [`Proposal`].
//!
//! Two panels share one aggregation core:
//! - [`Council`]: deterministic heuristic votes, no external delegation.
//!   Always available, and the fallback target of the multi-agent panel.
//! - [`MultiAgentCouncil`]: delegates each role to an independently running
//!   task through a [`TaskDelegator`], collects JSON verdicts under a
//!   per-role timeout and reduces them with the [`aggregator`].
//!
//! Neither panel ever approves by default: a review that cannot be carried
//! out ends in a rejection stamped with the failure reason.

use async_trait::async_trait;

use governance_types::{CouncilRole, Decision, Proposal};

pub mod aggregator;
pub mod config;
pub mod multi_agent;
pub mod prompts;
pub mod simulated;
pub mod verdict;


pub use aggregator::{aggregate, AggregationPolicy, Aggregation, Tally, WeightedVote};
pub use config::{CouncilConfig, RoleConfig};
pub use multi_agent::{
    AgentReviewResult, DelegationRequest, DelegationResponse, MultiAgentCouncil, MultiAgentReview,
    ProfileResolver, PromptCompleter, TaskDelegator,
};
pub use simulated::Council;

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, CouncilError>;

/// Top-level error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum CouncilError {
    #[error("task delegation unavailable")]
    DelegationUnavailable,

    #[error("no active host task to delegate from")]
    NoHostTask,

    #[error("agent {role} timed out after {timeout_ms}ms")]
    Timeout { role: CouncilRole, timeout_ms: u64 },

    #[error("agent {role} delegation failed: {message}")]
    Delegation { role: CouncilRole, message: String },

    #[error("agent {role} returned a malformed verdict: {message}")]
    MalformedVerdict { role: CouncilRole, message: String },

    #[error("council configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Anything that can rule on a proposal.
///
/// Reviews are infallible from the caller's point of view: every failure
/// mode is folded into a rejecting [`Decision`].
#[async_trait]
pub trait ProposalReviewer: Send + Sync {
    /// Attribution recorded on the proposal (`reviewedBy`).
    fn name(&self) -> &'static str;

    async fn review_proposal(&self, proposal: &Proposal) -> Decision;
}
