// governance-loop-rs/src/scheduler.rs
// Periodic metrics refresh and auto-heal sweep.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use governance_types::ProposalStatus;
use self_healing::{RollbackAction, RollbackResult, SelfHealingMonitor};

use crate::events::{EventBus, GovernanceEvent};
use crate::metrics_source::{MetricsSource, MetricsWindow};
use crate::store::ProposalStore;
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    /// Monitored applications whose after-metrics were updated.
    pub refreshed: usize,
    pub rollbacks: Vec<RollbackAction>,
}

pub struct Scheduler {
    monitor: Arc<SelfHealingMonitor>,
    metrics: Arc<dyn MetricsSource>,
    store: Arc<dyn ProposalStore>,
    events: Arc<EventBus>,
}

impl Scheduler {
    pub fn new(
        monitor: Arc<SelfHealingMonitor>,
        metrics: Arc<dyn MetricsSource>,
        store: Arc<dyn ProposalStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            monitor,
            metrics,
            store,
            events,
        }
    }

    /// One pass. Safe to repeat; must not overlap with another tick on the
    /// same data directory.
    #[instrument(name = "scheduler_tick", skip(self))]
    pub async fn tick(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        for application in self.monitor.monitored_applications().await {
            if let Some(after) = self
                .metrics
                .snapshot(MetricsWindow::Since(application.applied_at))
                .await
            {
                self.monitor.update_metrics(&application.id, after).await?;
                report.refreshed += 1;
            }
        }

        let actions = self.monitor.run_auto_heal().await?;
        for action in &actions {
            let Some(application) = self.monitor.application(&action.application_id).await else {
                continue;
            };
            if action.result != RollbackResult::Failed {
                self.mark_rolled_back(&application.proposal_id).await?;
            }
            self.events.emit(GovernanceEvent::ApplicationRolledBack {
                proposal_id: application.proposal_id,
                application_id: Some(action.application_id.clone()),
                restored_files: action.restored_files.clone(),
                result: action.result,
                automatic: action.automatic,
            });
        }

        report.rollbacks = actions;
        Ok(report)
    }

    async fn mark_rolled_back(&self, proposal_id: &str) -> Result<()> {
        let Some(mut proposal) = self.store.get(proposal_id).await? else {
            debug!(proposal.id = %proposal_id, "no stored proposal for rolled back application");
            return Ok(());
        };
        if proposal.status.can_transition_to(ProposalStatus::RolledBack) {
            proposal.transition_to(ProposalStatus::RolledBack)?;
            self.store.save(&proposal).await?;
        }
        Ok(())
    }

    /// Tick every `interval` until `shutdown` turns true or its sender is
    /// dropped. Tick failures are logged, published and retried next tick.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if !report.rollbacks.is_empty() => {
                            info!(rollbacks = report.rollbacks.len(), refreshed = report.refreshed, "auto-heal rolled back applications");
                        }
                        Ok(report) => debug!(refreshed = report.refreshed, "scheduler tick complete"),
                        Err(err) => {
                            warn!(error = %err, "scheduler tick failed");
                            self.events.emit(GovernanceEvent::Error { message: err.to_string() });
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler stopped");
                        break;
                    }
                }
            }
        }
    }
}
