// council-rs/src/simulated.rs
// Deterministic heuristic review panel.
//
// Exists so a decision is always obtainable without any external reviewer,
// and as the fallback target of the multi-agent panel.

use async_trait::async_trait;
use tracing::{debug, info};

use governance_types::{CouncilRole, Decision, Proposal, Risk, Vote, VoteKind};

use crate::aggregator::{aggregate, AggregationPolicy, WeightedVote};
use crate::config::CouncilConfig;
use crate::ProposalReviewer;

/// Descriptions shorter than this are sent back for more detail.
const MIN_DESCRIPTION_CHARS: usize = 20;

/// Payload flags that switch off a safeguard.
const SAFEGUARD_FLAGS: [&str; 3] = ["disable_safety", "bypass_review", "disable_rollback"];

pub(crate) const HIGH_RISK_REASON: &str = "High-risk proposal requires human review";

#[derive(Debug, Clone, Default)]
pub struct Council {
    config: CouncilConfig,
}

impl Council {
    pub fn new(config: CouncilConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    /// One heuristic vote per active role.
    pub fn cast_votes(&self, proposal: &Proposal) -> Vec<Vote> {
        self.config
            .active_roles()
            .into_iter()
            .map(|role| heuristic_vote(role, proposal))
            .collect()
    }

    pub fn review(&self, proposal: &Proposal) -> Decision {
        if self.config.reject_high_risk && proposal.risk == Risk::High {
            info!(proposal.id = %proposal.id, "high-risk proposal rejected without vote");
            record_decision(false);
            return Decision::rejected(&proposal.id, HIGH_RISK_REASON);
        }

        let votes = self.cast_votes(proposal);
        let weighted: Vec<WeightedVote> = votes.iter().map(|v| WeightedVote::certain(v.vote)).collect();

        // Every heuristic vote has the same weight, so weighting adds nothing.
        let policy = match self.config.policy {
            AggregationPolicy::Weighted => AggregationPolicy::Majority,
            other => other,
        };
        let outcome = aggregate(policy, &weighted);

        debug!(
            proposal.id = %proposal.id,
            approved = outcome.approved,
            summary = %outcome.summary,
            "simulated council tallied votes"
        );
        record_decision(outcome.approved);

        Decision::from_votes(&proposal.id, outcome.approved, outcome.summary, votes)
    }
}

#[async_trait]
impl ProposalReviewer for Council {
    fn name(&self) -> &'static str {
        "council"
    }

    async fn review_proposal(&self, proposal: &Proposal) -> Decision {
        self.review(proposal)
    }
}

fn record_decision(approved: bool) {
    metrics::increment_counter!(
        "council_decisions_total",
        "panel" => "simulated",
        "outcome" => if approved { "approved" } else { "rejected" }
    );
}

/// Role-specific heuristic. Exhaustive over [`CouncilRole`].
pub(crate) fn heuristic_vote(role: CouncilRole, proposal: &Proposal) -> Vote {
    let id = proposal.id.as_str();
    match role {
        CouncilRole::Analyst => match &proposal.source_signal_id {
            Some(signal) => Vote::new(
                id,
                role,
                VoteKind::Approve,
                format!("grounded in signal {signal}"),
            ),
            None => Vote::new(
                id,
                role,
                VoteKind::RequestChanges,
                "no source signal backs this proposal",
            )
            .with_suggestions(vec!["link the proposal to the signal that motivated it".to_string()]),
        },
        CouncilRole::Reviewer => {
            if proposal.title.trim().is_empty() {
                Vote::new(id, role, VoteKind::Reject, "proposal has no title")
            } else if proposal.description.trim().chars().count() < MIN_DESCRIPTION_CHARS {
                Vote::new(id, role, VoteKind::RequestChanges, "description too short to review")
                    .with_suggestions(vec![
                        "describe the observed problem and the expected effect".to_string(),
                    ])
            } else {
                Vote::new(id, role, VoteKind::Approve, "proposal is clearly described")
            }
        }
        CouncilRole::Security => match proposal.risk {
            Risk::High => Vote::new(id, role, VoteKind::Reject, "high risk change"),
            Risk::Medium => Vote::new(
                id,
                role,
                VoteKind::Approve,
                "medium risk, acceptable with monitoring",
            ),
            Risk::Low => Vote::new(id, role, VoteKind::Approve, "low risk"),
        },
        CouncilRole::Ethics => {
            let disabled: Vec<&str> = SAFEGUARD_FLAGS
                .into_iter()
                .filter(|flag| {
                    proposal
                        .payload
                        .get(*flag)
                        .and_then(|v| v.as_bool())
                        .unwrap_or(false)
                })
                .collect();
            if disabled.is_empty() {
                Vote::new(id, role, VoteKind::Approve, "no safeguard is weakened")
            } else {
                Vote::new(
                    id,
                    role,
                    VoteKind::Reject,
                    format!("proposal disables safeguards: {}", disabled.join(", ")),
                )
            }
        }
    }
}
