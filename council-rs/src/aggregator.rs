// council-rs/src/aggregator.rs
// Pure vote aggregation shared by both review panels.

use std::fmt;

use serde::{Deserialize, Serialize};

use governance_types::VoteKind;

/// How a set of votes becomes one decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Every non-abstaining vote approves, and at least one vote is active.
    Unanimity,
    /// Approvals exceed half of the non-abstaining votes.
    #[default]
    Majority,
    /// At least one approval and no rejection.
    AnyApprove,
    /// Confidence-weighted approvals outweigh confidence-weighted rejections.
    Weighted,
}

impl AggregationPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregationPolicy::Unanimity => "unanimity",
            AggregationPolicy::Majority => "majority",
            AggregationPolicy::AnyApprove => "any_approve",
            AggregationPolicy::Weighted => "weighted",
        }
    }

    pub fn parse(raw: &str) -> Option<AggregationPolicy> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "unanimity" | "unanimous" => Some(AggregationPolicy::Unanimity),
            "majority" => Some(AggregationPolicy::Majority),
            "any_approve" | "any" => Some(AggregationPolicy::AnyApprove),
            "weighted" => Some(AggregationPolicy::Weighted),
            _ => None,
        }
    }
}

impl fmt::Display for AggregationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vote as seen by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedVote {
    pub vote: VoteKind,
    pub confidence: f64,
}

impl WeightedVote {
    pub fn new(vote: VoteKind, confidence: f64) -> Self {
        Self { vote, confidence }
    }

    /// Heuristic votes carry full weight.
    pub fn certain(vote: VoteKind) -> Self {
        Self::new(vote, 1.0)
    }
}

/// Per-kind counts and weights.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tally {
    pub approve: usize,
    pub reject: usize,
    pub abstain: usize,
    pub request_changes: usize,
    pub approve_weight: f64,
    pub reject_weight: f64,
}

impl Tally {
    pub fn from_votes(votes: &[WeightedVote]) -> Self {
        let mut tally = Tally::default();
        for v in votes {
            match v.vote {
                VoteKind::Approve => {
                    tally.approve += 1;
                    tally.approve_weight += v.confidence;
                }
                VoteKind::Reject => {
                    tally.reject += 1;
                    tally.reject_weight += v.confidence;
                }
                VoteKind::Abstain => tally.abstain += 1,
                VoteKind::RequestChanges => tally.request_changes += 1,
            }
        }
        tally
    }

    /// Votes that are not abstentions.
    pub fn active(&self) -> usize {
        self.approve + self.reject + self.request_changes
    }
}

/// Aggregated outcome plus a human-readable account of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub approved: bool,
    pub tally: Tally,
    pub summary: String,
}

pub fn aggregate(policy: AggregationPolicy, votes: &[WeightedVote]) -> Aggregation {
    let tally = Tally::from_votes(votes);
    let active = tally.active();

    let approved = match policy {
        AggregationPolicy::Unanimity => active > 0 && tally.approve == active,
        AggregationPolicy::Majority => active > 0 && tally.approve * 2 > active,
        AggregationPolicy::AnyApprove => tally.approve >= 1 && tally.reject == 0,
        AggregationPolicy::Weighted => tally.approve_weight > tally.reject_weight,
    };

    let mut summary = format!(
        "{policy}: {} approve, {} reject, {} request_changes, {} abstain",
        tally.approve, tally.reject, tally.request_changes, tally.abstain
    );
    if policy == AggregationPolicy::Weighted {
        summary.push_str(&format!(
            " (weight {:.2} vs {:.2})",
            tally.approve_weight, tally.reject_weight
        ));
    }

    Aggregation {
        approved,
        tally,
        summary,
    }
}
