// council-rs/src/multi_agent.rs
// Review panel that delegates every role to an independently running task.
//
// Roles are read-only reviewers with no shared mutable state, so they are
// dispatched concurrently and joined behind an all-complete barrier. Each
// role races its own timeout; a failure stays confined to that role unless
// the configuration says to abort.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use governance_types::{CouncilRole, Decision, Proposal, Risk, Vote, VoteKind};

use crate::aggregator::{aggregate, WeightedVote};
use crate::config::CouncilConfig;
use crate::prompts;
use crate::simulated::{Council, HIGH_RISK_REASON};
use crate::verdict::{parse_verdict, AgentVerdict};
use crate::{CouncilError, ProposalReviewer};

/// Maps a role and its configured profile name to the profile the host
/// should run the reviewer with.
pub type ProfileResolver = Arc<dyn Fn(CouncilRole, &str) -> String + Send + Sync>;

/// Turns a template into the final prompt for a proposal.
pub type PromptCompleter = Arc<dyn Fn(&str, &Proposal) -> String + Send + Sync>;

/// One delegated review task.
#[derive(Debug, Clone)]
pub struct DelegationRequest {
    pub role: CouncilRole,
    pub profile: String,
    pub prompt: String,
    /// Host task the review is delegated from.
    pub parent_task_id: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DelegationResponse {
    pub task_id: String,
    /// Raw reviewer reply, expected to carry a JSON verdict.
    pub output: String,
}

/// Host capability to run a sub-task and wait for its final output.
#[async_trait]
pub trait TaskDelegator: Send + Sync {
    /// Task currently driving the host, if any.
    fn current_task_id(&self) -> Option<String>;

    async fn delegate(&self, request: DelegationRequest) -> Result<DelegationResponse, CouncilError>;
}

/// Outcome of a single delegated role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReviewResult {
    pub role: CouncilRole,
    pub vote: VoteKind,
    pub confidence: f64,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issues: Option<Vec<String>>,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl AgentReviewResult {
    fn from_verdict(role: CouncilRole, verdict: AgentVerdict, elapsed: Duration, task_id: String) -> Self {
        Self {
            role,
            vote: verdict.vote,
            confidence: verdict.confidence,
            reasoning: verdict.reasoning,
            suggestions: non_empty(verdict.suggestions),
            issues: non_empty(verdict.issues),
            duration_ms: elapsed.as_millis() as u64,
            completed_at: Utc::now(),
            error: None,
            task_id: Some(task_id),
        }
    }

    /// A role that could not deliver a verdict: abstains with no weight.
    fn failed(role: CouncilRole, err: &CouncilError, elapsed: Duration) -> Self {
        Self {
            role,
            vote: VoteKind::Abstain,
            confidence: 0.0,
            reasoning: format!("review failed: {err}"),
            suggestions: None,
            issues: None,
            duration_ms: elapsed.as_millis() as u64,
            completed_at: Utc::now(),
            error: Some(err.to_string()),
            task_id: None,
        }
    }

    /// Votes below `threshold` never count toward approval or rejection.
    fn coerce_low_confidence(&mut self, threshold: f64) {
        if self.vote != VoteKind::Abstain && self.confidence < threshold {
            debug!(
                role = %self.role,
                vote = %self.vote,
                confidence = self.confidence,
                threshold,
                "low-confidence vote counted as abstain"
            );
            self.reasoning = format!(
                "{} [{} at confidence {:.2} counted as abstain]",
                self.reasoning, self.vote, self.confidence
            );
            self.vote = VoteKind::Abstain;
        }
    }

    fn to_vote(&self, proposal_id: &str) -> Vote {
        let mut vote = Vote::new(proposal_id, self.role, self.vote, self.reasoning.clone())
            .with_suggestions(self.suggestions.clone().unwrap_or_default());
        vote.timestamp = self.completed_at;
        vote
    }
}

fn non_empty(items: Vec<String>) -> Option<Vec<String>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

/// Decision plus the per-role evidence behind it.
#[derive(Debug, Clone)]
pub struct MultiAgentReview {
    pub decision: Decision,
    /// Role results after low-confidence coercion. Empty on fallback.
    pub results: Vec<AgentReviewResult>,
    /// Whether the simulated panel produced the decision.
    pub fell_back: bool,
}

pub struct MultiAgentCouncil {
    config: CouncilConfig,
    delegator: Option<Arc<dyn TaskDelegator>>,
    fallback: Council,
    resolve_profile: ProfileResolver,
    complete_prompt: PromptCompleter,
}

impl MultiAgentCouncil {
    /// `delegator` is `None` when the host offers no delegation capability;
    /// every review then takes the failure path.
    pub fn new(config: CouncilConfig, delegator: Option<Arc<dyn TaskDelegator>>) -> Self {
        Self {
            fallback: Council::new(config.clone()),
            config,
            delegator,
            resolve_profile: Arc::new(|_: CouncilRole, profile: &str| profile.to_string()),
            complete_prompt: Arc::new(prompts::render),
        }
    }

    pub fn with_profile_resolver(mut self, resolver: ProfileResolver) -> Self {
        self.resolve_profile = resolver;
        self
    }

    pub fn with_prompt_completer(mut self, completer: PromptCompleter) -> Self {
        self.complete_prompt = completer;
        self
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    #[instrument(
        name = "multi_agent_review",
        skip(self, proposal),
        fields(proposal.id = %proposal.id, proposal.risk = %proposal.risk)
    )]
    pub async fn review_detailed(&self, proposal: &Proposal) -> MultiAgentReview {
        if self.config.reject_high_risk && proposal.risk == Risk::High {
            info!("high-risk proposal rejected without delegation");
            record_decision(false);
            return MultiAgentReview {
                decision: Decision::rejected(&proposal.id, HIGH_RISK_REASON),
                results: Vec::new(),
                fell_back: false,
            };
        }

        match self.run_panel(proposal).await {
            Ok(review) => {
                record_decision(review.decision.approved);
                review
            }
            Err(err) => self.on_total_failure(proposal, err),
        }
    }

    async fn run_panel(&self, proposal: &Proposal) -> Result<MultiAgentReview, CouncilError> {
        let delegator = self
            .delegator
            .as_ref()
            .ok_or(CouncilError::DelegationUnavailable)?;
        let parent_task_id = delegator.current_task_id().ok_or(CouncilError::NoHostTask)?;

        let roles = self.config.active_roles();
        if roles.is_empty() {
            return Err(CouncilError::Config("no council role is enabled".to_string()));
        }

        let timeout = self.config.agent_timeout();
        let mut requests = Vec::with_capacity(roles.len());
        for role in roles {
            let role_cfg = self.config.role_config(role);
            let template = prompts::load_template(role, role_cfg.prompt_path.as_deref()).await;
            requests.push(DelegationRequest {
                role,
                profile: (self.resolve_profile)(role, &role_cfg.profile),
                prompt: (self.complete_prompt)(&template, proposal),
                parent_task_id: parent_task_id.clone(),
                timeout,
            });
        }

        let outcomes = join_all(
            requests
                .into_iter()
                .map(|request| run_role(Arc::clone(delegator), request)),
        )
        .await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (role, elapsed, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(err) if self.config.continue_on_agent_failure => {
                    warn!(%role, error = %err, "reviewer agent failed; counting as abstain");
                    metrics::increment_counter!("council_agent_failures_total", "role" => role.as_str());
                    results.push(AgentReviewResult::failed(role, &err, elapsed));
                }
                Err(err) => return Err(err),
            }
        }

        for result in &mut results {
            result.coerce_low_confidence(self.config.min_confidence_threshold);
        }

        let weighted: Vec<WeightedVote> = results
            .iter()
            .map(|r| WeightedVote::new(r.vote, r.confidence))
            .collect();
        let outcome = aggregate(self.config.policy, &weighted);
        let votes = results.iter().map(|r| r.to_vote(&proposal.id)).collect();

        info!(approved = outcome.approved, summary = %outcome.summary, "multi-agent council decided");

        Ok(MultiAgentReview {
            decision: Decision::from_votes(
                &proposal.id,
                outcome.approved,
                format!("multi-agent {}", outcome.summary),
                votes,
            ),
            results,
            fell_back: false,
        })
    }

    fn on_total_failure(&self, proposal: &Proposal, err: CouncilError) -> MultiAgentReview {
        if self.config.fallback_to_simulated {
            warn!(error = %err, "multi-agent review unavailable; falling back to simulated council");
            let mut decision = self.fallback.review(proposal);
            decision.reason = format!("{} (simulated fallback: {err})", decision.reason);
            return MultiAgentReview {
                decision,
                results: Vec::new(),
                fell_back: true,
            };
        }

        warn!(error = %err, "multi-agent review failed; rejecting");
        record_decision(false);
        MultiAgentReview {
            decision: Decision::rejected(&proposal.id, format!("Multi-agent review failed: {err}")),
            results: Vec::new(),
            fell_back: false,
        }
    }
}

#[async_trait]
impl ProposalReviewer for MultiAgentCouncil {
    fn name(&self) -> &'static str {
        "multi-agent-council"
    }

    async fn review_proposal(&self, proposal: &Proposal) -> Decision {
        self.review_detailed(proposal).await.decision
    }
}

async fn run_role(
    delegator: Arc<dyn TaskDelegator>,
    request: DelegationRequest,
) -> (CouncilRole, Duration, Result<AgentReviewResult, CouncilError>) {
    let role = request.role;
    let limit = request.timeout;
    let started = Instant::now();

    let outcome = match tokio::time::timeout(limit, delegator.delegate(request)).await {
        Ok(Ok(response)) => parse_verdict(role, &response.output)
            .map(|verdict| AgentReviewResult::from_verdict(role, verdict, started.elapsed(), response.task_id)),
        Ok(Err(err)) => Err(err),
        Err(_) => Err(CouncilError::Timeout {
            role,
            timeout_ms: limit.as_millis() as u64,
        }),
    };

    (role, started.elapsed(), outcome)
}

fn record_decision(approved: bool) {
    metrics::increment_counter!(
        "council_decisions_total",
        "panel" => "multi_agent",
        "outcome" => if approved { "approved" } else { "rejected" }
    );
}
