// governance-loop-rs/src/applier.rs
// Seam between approved proposals and the filesystem.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use governance_types::{Clock, Proposal, SystemClock};
use proposal_apply::ProposalApplyEngine;
use self_healing::{RollbackResult, SelfHealingMonitor};

use crate::metrics_source::{MetricsSource, MetricsWindow};
use crate::{LoopError, Result};

/// Payload key naming the proposal directory, relative to the project root.
pub const PROPOSAL_DIR_KEY: &str = "proposal_dir";

/// `triggered_by` for rollbacks requested through the loop.
pub const MANUAL_TRIGGER: &str = "operator";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Autonomy-driven; the site policy must also allow automatic application.
    Automatic,
    /// Approved by a human or the council and applied on request.
    Approved,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub applied: bool,
    /// Nothing was attempted; the proposal should stay approved.
    pub deferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_record_id: Option<String>,
    /// Self-healing application tracking this change, when monitored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    pub changed_files: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ApplyReport {
    pub fn deferred(reason: impl Into<String>) -> Self {
        Self {
            deferred: true,
            errors: vec![reason.into()],
            ..Self::default()
        }
    }

    /// What a later rollback needs, stored on the proposal.
    pub fn rollback_data(&self) -> serde_json::Value {
        json!({
            "appliedRecordId": self.applied_record_id,
            "applicationId": self.application_id,
            "changedFiles": self.changed_files,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackSummary {
    pub application_id: Option<String>,
    pub restored_files: Vec<String>,
    pub result: RollbackResult,
}

#[async_trait]
pub trait ProposalApplier: Send + Sync {
    async fn apply(&self, proposal: &Proposal, mode: ApplyMode) -> Result<ApplyReport>;

    /// Revert using the proposal's `rollback_data`.
    async fn rollback(&self, proposal: &Proposal) -> Result<RollbackSummary>;
}

struct Monitoring {
    monitor: Arc<SelfHealingMonitor>,
    metrics: Arc<dyn MetricsSource>,
}

/// Applies proposals whose payload names a proposal directory through the
/// apply engine, optionally handing each application to the self-healing
/// monitor with a baseline snapshot.
pub struct DirectoryProposalApplier {
    engine: Arc<ProposalApplyEngine>,
    monitoring: Option<Monitoring>,
    clock: Arc<dyn Clock>,
}

impl DirectoryProposalApplier {
    pub fn new(engine: Arc<ProposalApplyEngine>) -> Self {
        Self {
            engine,
            monitoring: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<SelfHealingMonitor>, metrics: Arc<dyn MetricsSource>) -> Self {
        self.monitoring = Some(Monitoring { monitor, metrics });
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &Arc<ProposalApplyEngine> {
        &self.engine
    }

    /// Apply a proposal directory. `proposal_id` defaults to the id in the
    /// directory's metadata, then to the applied record id.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub async fn apply_dir(&self, proposal_id: Option<&str>, dir: &Path, mode: ApplyMode) -> Result<ApplyReport> {
        let parsed = self.engine.parse_proposal(dir).await?;

        if mode == ApplyMode::Automatic && !self.engine.can_auto_apply(&parsed).await {
            info!("site policy does not allow automatic application; deferring");
            return Ok(ApplyReport::deferred(
                "site policy does not allow automatic application",
            ));
        }

        let before = match &self.monitoring {
            Some(m) => m.metrics.snapshot(MetricsWindow::Before(self.clock.now())).await,
            None => None,
        };

        let outcome = self.engine.apply_proposal(&parsed).await?;
        let mut report = ApplyReport {
            applied: outcome.applied,
            applied_record_id: outcome.applied_record_id,
            changed_files: outcome.changed_files,
            errors: outcome.errors,
            ..ApplyReport::default()
        };

        let (Some(m), Some(record_id)) = (&self.monitoring, report.applied_record_id.clone()) else {
            return Ok(report);
        };
        let Some(before) = before else {
            warn!(record_id = %record_id, "no baseline metrics; application not monitored");
            return Ok(report);
        };

        let tracked_id = proposal_id
            .or_else(|| parsed.proposal_id())
            .unwrap_or(record_id.as_str())
            .to_string();
        let registered = match self.engine.load_record(&record_id).await {
            Ok(record) => m
                .monitor
                .record_applied_record(&tracked_id, &record, before)
                .await
                .map_err(LoopError::from),
            Err(err) => Err(err.into()),
        };
        match registered {
            Ok(application) => report.application_id = Some(application.id),
            Err(err) => warn!(record_id = %record_id, error = %err, "could not register application for monitoring"),
        }
        Ok(report)
    }
}

#[async_trait]
impl ProposalApplier for DirectoryProposalApplier {
    async fn apply(&self, proposal: &Proposal, mode: ApplyMode) -> Result<ApplyReport> {
        let dir = proposal
            .payload
            .get(PROPOSAL_DIR_KEY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| LoopError::MissingProposalDir(proposal.id.clone()))?;
        self.apply_dir(Some(&proposal.id), Path::new(dir), mode).await
    }

    async fn rollback(&self, proposal: &Proposal) -> Result<RollbackSummary> {
        let data = proposal
            .rollback_data
            .as_ref()
            .ok_or_else(|| LoopError::NoRollbackData(proposal.id.clone()))?;
        let field = |key: &str| data.get(key).and_then(|v| v.as_str()).map(str::to_string);

        if let (Some(m), Some(application_id)) = (&self.monitoring, field("applicationId")) {
            let action = m
                .monitor
                .rollback(&application_id, "manual rollback", false, MANUAL_TRIGGER)
                .await?;
            if action.result == RollbackResult::Failed {
                return Err(LoopError::RollbackFailed {
                    proposal_id: proposal.id.clone(),
                    message: action.error.unwrap_or_default(),
                });
            }
            return Ok(RollbackSummary {
                application_id: Some(application_id),
                restored_files: action.restored_files,
                result: action.result,
            });
        }

        let record_id = field("appliedRecordId").ok_or_else(|| LoopError::NoRollbackData(proposal.id.clone()))?;
        let report = self.engine.rollback_proposal(&record_id).await?;
        Ok(RollbackSummary {
            application_id: None,
            restored_files: report.touched_files(),
            result: RollbackResult::Success,
        })
    }
}
