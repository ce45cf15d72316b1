// self-healing-rs/src/lib.rs
// Self-healing monitor for applied proposals.
//
// Every application is tracked with the metrics measured before it. Once
// after-metrics arrive, the change is scored for regression; a bad enough
// score reverts it automatically, at most `max_daily_rollbacks` times per
// UTC calendar day.
//
// State lives under one data directory:
//   config.yaml        thresholds and switches (defaults written on first use)
//   applications.json  every tracked application
//   rollback-log.json  every rollback attempt, automatic or manual
// Both JSON documents are rewritten wholesale after each mutation.

use chrono::NaiveDate;

pub mod config;
pub mod degradation;
pub mod model;
pub mod monitor;
pub mod reverter;

#[cfg(test)]
mod tests;

pub use config::SelfHealingConfig;
pub use degradation::{score, DegradationResult, Recommendation};
pub use model::{ApplicationStatus, ProposalApplication, RollbackAction, RollbackResult};
pub use monitor::{HealingStatistics, SelfHealingMonitor};
pub use reverter::{ApplicationReverter, EngineReverter, RevertOutcome};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, HealingError>;

#[derive(Debug, thiserror::Error)]
pub enum HealingError {
    #[error("application {0} not found")]
    NotFound(String),

    #[error("application {0} has already been rolled back")]
    AlreadyRolledBack(String),

    #[error("daily automatic rollback limit of {max} reached for {date}")]
    RateLimited { max: u32, date: NaiveDate },

    #[error("self-healing configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl HealingError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, HealingError::RateLimited { .. })
    }
}
