// governance-loop-rs/src/orchestrator.rs
// Signal buffer, proposal review routing and application.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use council::{Council, CouncilConfig, ProposalReviewer};
use governance_types::{Proposal, ProposalStatus, Signal, TransitionError};

use crate::applier::{ApplyMode, ProposalApplier};
use crate::config::GovernanceLoopConfig;
use crate::events::{EventBus, GovernanceEvent};
use crate::generator::ProposalGenerator;
use crate::store::ProposalStore;
use crate::{LoopError, Result};

/// `reviewedBy` for proposals approved by the autonomy level alone.
pub const AUTO_REVIEWER: &str = "auto";
/// `reviewedBy` for [`GovernanceLoop::review_manually`].
pub const MANUAL_REVIEWER: &str = "human";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub signals: usize,
    /// Final state of every proposal handled without error.
    pub proposals: Vec<Proposal>,
    pub errors: Vec<String>,
}

impl CycleSummary {
    pub fn count(&self, status: ProposalStatus) -> usize {
        self.proposals.iter().filter(|p| p.status == status).count()
    }
}

pub struct GovernanceLoop {
    config: GovernanceLoopConfig,
    generator: Arc<dyn ProposalGenerator>,
    store: Arc<dyn ProposalStore>,
    applier: Arc<dyn ProposalApplier>,
    reviewer: Arc<dyn ProposalReviewer>,
    events: Arc<EventBus>,
    buffer: Mutex<Vec<Signal>>,
    // Cycles run one at a time.
    cycle: Mutex<()>,
}

impl GovernanceLoop {
    /// Reviews go to a simulated [`Council`] with default settings until
    /// [`with_reviewer`](Self::with_reviewer) says otherwise.
    pub fn new(
        config: GovernanceLoopConfig,
        generator: Arc<dyn ProposalGenerator>,
        store: Arc<dyn ProposalStore>,
        applier: Arc<dyn ProposalApplier>,
    ) -> Self {
        Self {
            config,
            generator,
            store,
            applier,
            reviewer: Arc::new(Council::new(CouncilConfig::default())),
            events: Arc::new(EventBus::new()),
            buffer: Mutex::new(Vec::new()),
            cycle: Mutex::new(()),
        }
    }

    pub fn with_reviewer(mut self, reviewer: Arc<dyn ProposalReviewer>) -> Self {
        self.reviewer = reviewer;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &GovernanceLoopConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn ProposalStore> {
        &self.store
    }

    pub async fn buffered_signals(&self) -> usize {
        self.buffer.lock().await.len()
    }

    /// Buffer a signal; runs a cycle once the threshold is reached.
    pub async fn process_signal(&self, signal: Signal) -> Result<Option<CycleSummary>> {
        debug!(signal.id = %signal.id, signal.kind = %signal.signal_type, "signal received");
        self.events.emit(GovernanceEvent::SignalDetected { signal: signal.clone() });

        let buffered = {
            let mut buffer = self.buffer.lock().await;
            buffer.push(signal);
            buffer.len()
        };
        if buffered < self.config.signal_threshold {
            return Ok(None);
        }
        self.run_cycle().await.map(Some)
    }

    /// Drain the buffer, generate proposals and route each one.
    ///
    /// A generator failure puts the drained signals back and is returned.
    /// Per-proposal failures are reported as `error` events and collected in
    /// the summary; the remaining proposals are still handled.
    #[instrument(name = "governance_cycle", skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let _cycle = self.cycle.lock().await;
        let signals = std::mem::take(&mut *self.buffer.lock().await);
        let mut summary = CycleSummary {
            signals: signals.len(),
            ..CycleSummary::default()
        };
        if signals.is_empty() {
            self.events.emit(GovernanceEvent::CycleComplete {
                signals: 0,
                proposals: 0,
            });
            return Ok(summary);
        }

        let proposals = match self.generator.generate(&signals).await {
            Ok(proposals) => proposals,
            Err(err) => {
                {
                    let mut buffer = self.buffer.lock().await;
                    let arrived_since = std::mem::replace(&mut *buffer, signals);
                    buffer.extend(arrived_since);
                }
                self.report_error(&err);
                return Err(err);
            }
        };
        let generated = proposals.len();
        info!(signals = summary.signals, proposals = generated, "proposals generated");

        for proposal in proposals {
            let id = proposal.id.clone();
            match self.process_proposal(proposal).await {
                Ok(proposal) => summary.proposals.push(proposal),
                Err(err) => {
                    self.report_error(&err);
                    summary.errors.push(format!("{id}: {err}"));
                }
            }
        }

        self.events.emit(GovernanceEvent::CycleComplete {
            signals: summary.signals,
            proposals: generated,
        });
        metrics::increment_counter!("governance_cycles_total");
        Ok(summary)
    }

    async fn process_proposal(&self, proposal: Proposal) -> Result<Proposal> {
        self.store.save(&proposal).await?;
        self.events.emit(GovernanceEvent::ProposalGenerated {
            proposal: proposal.clone(),
        });

        let mut proposal = proposal;
        let level = self.config.autonomy_level;
        let auto_apply = level.allows_auto_apply(proposal.risk);

        if self.config.council_review_enabled {
            let decision = self.reviewer.review_proposal(&proposal).await;
            self.record_review(&mut proposal, decision.approved, self.reviewer.name(), decision.reason)
                .await?;
            if !decision.approved || !auto_apply {
                return Ok(proposal);
            }
        } else if auto_apply {
            let reason = format!("auto-approved at autonomy level {level}");
            self.record_review(&mut proposal, true, AUTO_REVIEWER, reason).await?;
        } else {
            debug!(proposal.id = %proposal.id, "awaiting manual review");
            return Ok(proposal);
        }

        self.apply_approved(&mut proposal, ApplyMode::Automatic).await?;
        Ok(proposal)
    }

    /// Approve or reject a pending proposal by hand.
    pub async fn review_manually(&self, id: &str, approve: bool, notes: &str) -> Result<Proposal> {
        let mut proposal = self.load(id).await?;
        self.record_review(&mut proposal, approve, MANUAL_REVIEWER, notes.to_string())
            .await?;
        Ok(proposal)
    }

    /// Apply an approved proposal on request. Autonomy and the site
    /// policy's automation level are not consulted.
    pub async fn apply_proposal(&self, id: &str) -> Result<Proposal> {
        let mut proposal = self.load(id).await?;
        if proposal.status != ProposalStatus::Approved {
            return Err(TransitionError {
                proposal_id: proposal.id,
                from: proposal.status,
                to: ProposalStatus::Applied,
            }
            .into());
        }
        self.apply_approved(&mut proposal, ApplyMode::Approved).await?;
        Ok(proposal)
    }

    /// Revert an applied proposal.
    #[instrument(skip(self))]
    pub async fn rollback_proposal(&self, id: &str) -> Result<Proposal> {
        let mut proposal = self.load(id).await?;
        if !proposal.status.can_transition_to(ProposalStatus::RolledBack) {
            return Err(TransitionError {
                proposal_id: proposal.id,
                from: proposal.status,
                to: ProposalStatus::RolledBack,
            }
            .into());
        }

        let summary = self.applier.rollback(&proposal).await?;
        proposal.transition_to(ProposalStatus::RolledBack)?;
        self.store.save(&proposal).await?;

        info!(restored = summary.restored_files.len(), result = summary.result.as_str(), "proposal rolled back");
        self.events.emit(GovernanceEvent::ApplicationRolledBack {
            proposal_id: proposal.id.clone(),
            application_id: summary.application_id,
            restored_files: summary.restored_files,
            result: summary.result,
            automatic: false,
        });
        Ok(proposal)
    }

    async fn load(&self, id: &str) -> Result<Proposal> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| LoopError::NotFound(id.to_string()))
    }

    async fn record_review(
        &self,
        proposal: &mut Proposal,
        approved: bool,
        reviewed_by: &str,
        reason: String,
    ) -> Result<()> {
        proposal.record_review(approved, reviewed_by, reason.clone())?;
        self.store.save(proposal).await?;

        info!(proposal.id = %proposal.id, approved, reviewed_by, "proposal reviewed");
        let proposal_id = proposal.id.clone();
        let reviewed_by = reviewed_by.to_string();
        self.events.emit(if approved {
            GovernanceEvent::ProposalApproved {
                proposal_id,
                reviewed_by,
                reason,
            }
        } else {
            GovernanceEvent::ProposalRejected {
                proposal_id,
                reviewed_by,
                reason,
            }
        });
        Ok(())
    }

    /// `approved -> applied | failed`. A deferred automatic application
    /// leaves the proposal approved.
    async fn apply_approved(&self, proposal: &mut Proposal, mode: ApplyMode) -> Result<()> {
        let report = match self.applier.apply(proposal, mode).await {
            Ok(report) => report,
            Err(err) => {
                warn!(proposal.id = %proposal.id, error = %err, "application failed");
                return self.mark_failed(proposal, err.to_string()).await;
            }
        };

        if report.deferred {
            info!(proposal.id = %proposal.id, reason = ?report.errors, "application deferred");
            return Ok(());
        }
        if !report.applied {
            return self.mark_failed(proposal, report.errors.join("; ")).await;
        }

        proposal.transition_to(ProposalStatus::Applied)?;
        proposal.rollback_data = Some(report.rollback_data());
        self.store.save(proposal).await?;

        metrics::increment_counter!("governance_proposals_applied_total");
        self.events.emit(GovernanceEvent::ProposalApplied {
            proposal_id: proposal.id.clone(),
            applied_record_id: report.applied_record_id,
            changed_files: report.changed_files,
        });
        Ok(())
    }

    async fn mark_failed(&self, proposal: &mut Proposal, error: String) -> Result<()> {
        proposal.transition_to(ProposalStatus::Failed)?;
        self.store.save(proposal).await?;
        self.events.emit(GovernanceEvent::ProposalFailed {
            proposal_id: proposal.id.clone(),
            error,
        });
        Ok(())
    }

    fn report_error(&self, err: &LoopError) {
        error!(error = %err, "governance cycle error");
        self.events.emit(GovernanceEvent::Error {
            message: err.to_string(),
        });
    }
}
