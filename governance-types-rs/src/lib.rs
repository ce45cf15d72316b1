// governance-types-rs/src/lib.rs
// Shared data model for the governance pipeline.
//
// Every other crate in the workspace (council, proposal application,
// self-healing, orchestration loop) speaks in these types. The crate keeps
// no global state; persistence and policy live with the components that own
// them.

pub mod autonomy;
pub mod clock;
pub mod fs;
pub mod metrics;
pub mod proposal;
pub mod signal;
pub mod vote;


pub use autonomy::AutonomyLevel;
pub use clock::{Clock, ManualClock, SystemClock};
pub use metrics::PerformanceMetrics;
pub use proposal::{Proposal, ProposalStatus, ProposalType, Risk, TransitionError};
pub use signal::Signal;
pub use vote::{CouncilRole, Decision, Vote, VoteKind};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, GovernanceTypesError>;

/// Top-level error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceTypesError {
    #[error("invalid status transition: {0}")]
    Transition(#[from] TransitionError),

    #[error("invalid autonomy level: {0} (expected 0, 1 or 2)")]
    InvalidAutonomyLevel(u8),

    #[error("unknown council role: {0}")]
    UnknownRole(String),
}
