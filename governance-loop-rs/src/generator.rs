// governance-loop-rs/src/generator.rs

use async_trait::async_trait;

use governance_types::{Proposal, Signal};

use crate::Result;

/// Turns a batch of buffered signals into zero or more pending proposals.
///
/// Content generation (pattern detection, templates) lives with the host;
/// the loop only needs this seam. Return [`crate::LoopError::Generator`] on
/// failure so the batch is kept for the next cycle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProposalGenerator: Send + Sync {
    async fn generate(&self, signals: &[Signal]) -> Result<Vec<Proposal>>;
}
