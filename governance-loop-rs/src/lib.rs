//! # Governance Loop
//!
//! Sequences the governance pipeline into a signal-to-outcome cycle:
//!
//! ```text
//! signals -> buffer -> generator -> store -> review -> apply -> monitor
//!                                                         \-> scheduler -> rollback
//! ```
//!
//! - [`GovernanceLoop`] buffers signals, asks a [`ProposalGenerator`] for
//!   proposals once the threshold is reached, routes each through the
//!   autonomy gate and the council, and applies what may be applied.
//! - [`DirectoryProposalApplier`] bridges proposals to the apply engine and
//!   registers applications with the self-healing monitor.
//! - [`Scheduler`] refreshes after-metrics and runs the auto-heal sweep.
//! - [`EventBus`] publishes every step to in-process listeners.
//!
//! One governance process per project is assumed; nothing here locks across
//! processes.

use governance_types::TransitionError;
use proposal_apply::ApplyError;
use self_healing::HealingError;

pub mod applier;
pub mod config;
pub mod events;
pub mod generator;
pub mod logging;
pub mod metrics_source;
pub mod orchestrator;
pub mod scheduler;
pub mod store;


pub use applier::{ApplyMode, ApplyReport, DirectoryProposalApplier, ProposalApplier, RollbackSummary};
pub use config::{GovernanceLoopConfig, GovernancePaths};
pub use events::{EventBus, GovernanceEvent, ListenerId};
pub use generator::ProposalGenerator;
pub use logging::{init_logging, LoggingConfig};
pub use metrics_source::{MetricsSource, MetricsWindow, TaskLogMetricsSource, TaskSample};
pub use orchestrator::{CycleSummary, GovernanceLoop};
pub use scheduler::{Scheduler, TickReport};
pub use store::{InMemoryProposalStore, JsonFileProposalStore, ProposalStore};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, LoopError>;

/// Top-level error type for this crate.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("proposal {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("proposal generation failed: {0}")]
    Generator(String),

    #[error("proposal {0} does not name a proposal directory")]
    MissingProposalDir(String),

    #[error("proposal {0} carries no rollback data")]
    NoRollbackData(String),

    #[error("rollback of proposal {proposal_id} restored nothing: {message}")]
    RollbackFailed { proposal_id: String, message: String },

    #[error("proposal application error: {0}")]
    Apply(#[from] ApplyError),

    #[error("self-healing error: {0}")]
    Healing(#[from] HealingError),

    #[error("logging initialization failed: {0}")]
    Logging(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
