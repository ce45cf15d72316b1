// self-healing-rs/src/monitor.rs
// Tracks applications, scores them once metrics arrive and reverts the
// ones that regressed.
//
// The monitor holds no in-flight lock across processes: overlapping sweeps
// for the same data directory must be prevented by the caller.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use governance_types::fs::write_atomic;
use governance_types::{Clock, PerformanceMetrics, SystemClock};
use proposal_apply::AppliedRecord;

use crate::config::SelfHealingConfig;
use crate::degradation::{score, DegradationResult, Recommendation};
use crate::model::{ApplicationStatus, ProposalApplication, RollbackAction, RollbackResult};
use crate::reverter::ApplicationReverter;
use crate::{HealingError, Result};

pub const APPLICATIONS_FILE: &str = "applications.json";
pub const ROLLBACK_LOG_FILE: &str = "rollback-log.json";

/// `triggered_by` recorded for sweep-initiated rollbacks.
pub const AUTO_HEAL_TRIGGER: &str = "self-healing";

#[derive(Debug, Default)]
struct State {
    applications: Vec<ProposalApplication>,
    rollback_log: Vec<RollbackAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingStatistics {
    pub total: usize,
    pub monitoring: usize,
    pub effective: usize,
    pub degraded: usize,
    pub rolled_back: usize,
    pub needs_review: usize,
    pub rollbacks_today: usize,
    pub automatic_rollbacks_today: usize,
    pub remaining_automatic_rollbacks_today: usize,
}

pub struct SelfHealingMonitor {
    data_dir: PathBuf,
    config: SelfHealingConfig,
    clock: Arc<dyn Clock>,
    reverter: Arc<dyn ApplicationReverter>,
    state: Mutex<State>,
}

impl SelfHealingMonitor {
    pub async fn open(data_dir: impl Into<PathBuf>, reverter: Arc<dyn ApplicationReverter>) -> Result<Self> {
        Self::open_with_clock(data_dir, reverter, Arc::new(SystemClock)).await
    }

    /// Load config and state from `data_dir`, creating it if needed.
    pub async fn open_with_clock(
        data_dir: impl Into<PathBuf>,
        reverter: Arc<dyn ApplicationReverter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let config = SelfHealingConfig::load_or_init(&data_dir).await?;
        let applications: Vec<ProposalApplication> = read_json_or_default(&data_dir.join(APPLICATIONS_FILE)).await?;
        let rollback_log: Vec<RollbackAction> = read_json_or_default(&data_dir.join(ROLLBACK_LOG_FILE)).await?;

        info!(
            data_dir = %data_dir.display(),
            applications = applications.len(),
            rollbacks = rollback_log.len(),
            enabled = config.enabled,
            "self-healing monitor loaded"
        );

        Ok(Self {
            data_dir,
            config,
            clock,
            reverter,
            state: Mutex::new(State {
                applications,
                rollback_log,
            }),
        })
    }

    pub fn config(&self) -> &SelfHealingConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Start monitoring an application in `monitoring` state.
    ///
    /// The reverter snapshots `changed_files` first, so call this before
    /// they are modified: their current content is what a rollback restores.
    #[instrument(skip(self, changed_files, before))]
    pub async fn record_application(
        &self,
        proposal_id: &str,
        changed_files: Vec<String>,
        before: PerformanceMetrics,
    ) -> Result<ProposalApplication> {
        let mut application = ProposalApplication::new(proposal_id, changed_files, before, self.clock.now());
        self.reverter.snapshot(&mut application).await?;
        self.track(application).await
    }

    /// Start monitoring an application produced by the apply engine, so it
    /// can later be reverted through its record.
    pub async fn record_applied_record(
        &self,
        proposal_id: &str,
        record: &AppliedRecord,
        before: PerformanceMetrics,
    ) -> Result<ProposalApplication> {
        let mut application =
            ProposalApplication::new(proposal_id, record.changed_files.clone(), before, self.clock.now());
        application.applied_record_id = Some(record.id.clone());
        application.backup_paths = record
            .backup_files
            .iter()
            .filter_map(|b| b.backup_rel_path.clone().map(|rel| (b.path.clone(), rel)))
            .collect();
        application.created_files = record
            .backup_files
            .iter()
            .filter(|b| !b.existed)
            .map(|b| b.path.clone())
            .collect();
        self.track(application).await
    }

    async fn track(&self, application: ProposalApplication) -> Result<ProposalApplication> {
        let mut state = self.state.lock().await;
        state.applications.push(application.clone());
        self.save(&state).await?;

        info!(
            application.id = %application.id,
            proposal.id = %application.proposal_id,
            files = application.changed_files.len(),
            "monitoring application"
        );
        metrics::increment_counter!("self_healing_applications_total");
        Ok(application)
    }

    pub async fn update_metrics(&self, id: &str, after: PerformanceMetrics) -> Result<()> {
        let mut state = self.state.lock().await;
        let application = find_mut(&mut state, id)?;
        application.after_metrics = Some(after);
        self.save(&state).await
    }

    /// Score an application. `None` until after-metrics from at least
    /// `min_task_count` tasks are available.
    pub async fn evaluate_application(&self, id: &str) -> Result<Option<DegradationResult>> {
        let mut state = self.state.lock().await;
        let application = find_mut(&mut state, id)?;
        let result = self.evaluate(application);
        if result.is_some() {
            application.last_evaluation = result.clone();
            self.save(&state).await?;
        }
        Ok(result)
    }

    fn evaluate(&self, application: &ProposalApplication) -> Option<DegradationResult> {
        let after = application.after_metrics.as_ref()?;
        if after.task_count < self.config.min_task_count {
            debug!(
                application.id = %application.id,
                task_count = after.task_count,
                min = self.config.min_task_count,
                "not enough samples to evaluate"
            );
            return None;
        }
        Some(score(&application.before_metrics, after, &self.config))
    }

    /// Revert an application. Automatic rollbacks count against the daily
    /// quota and fail with [`HealingError::RateLimited`] once it is spent.
    #[instrument(skip(self, reason))]
    pub async fn rollback(
        &self,
        id: &str,
        reason: &str,
        automatic: bool,
        triggered_by: &str,
    ) -> Result<RollbackAction> {
        let mut state = self.state.lock().await;
        self.rollback_locked(&mut state, id, reason, automatic, triggered_by).await
    }

    async fn rollback_locked(
        &self,
        state: &mut State,
        id: &str,
        reason: &str,
        automatic: bool,
        triggered_by: &str,
    ) -> Result<RollbackAction> {
        let now = self.clock.now();
        let index = state
            .applications
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| HealingError::NotFound(id.to_string()))?;
        if state.applications[index].rolled_back {
            return Err(HealingError::AlreadyRolledBack(id.to_string()));
        }

        if automatic {
            let today = now.date_naive();
            let used = automatic_rollbacks_on(&state.rollback_log, today);
            if used >= self.config.max_daily_rollbacks as usize {
                warn!(application.id = %id, used, max = self.config.max_daily_rollbacks, "automatic rollback rate-limited");
                metrics::increment_counter!("self_healing_rollbacks_rate_limited_total");
                return Err(HealingError::RateLimited {
                    max: self.config.max_daily_rollbacks,
                    date: today,
                });
            }
        }

        let outcome = self.reverter.revert(&state.applications[index]).await;
        let result = outcome.result();
        let action = RollbackAction {
            id: Uuid::new_v4().to_string(),
            application_id: id.to_string(),
            timestamp: now,
            reason: reason.to_string(),
            restored_files: outcome.restored.clone(),
            automatic,
            triggered_by: triggered_by.to_string(),
            result,
            error: outcome.error_summary(),
        };

        let application = &mut state.applications[index];
        match result {
            RollbackResult::Success | RollbackResult::Partial => {
                application.status = ApplicationStatus::RolledBack;
                application.rolled_back = true;
            }
            RollbackResult::Failed => application.status = ApplicationStatus::NeedsReview,
        }
        state.rollback_log.push(action.clone());
        self.save(state).await?;

        match result {
            RollbackResult::Success => info!(application.id = %id, automatic, "application rolled back"),
            _ => warn!(
                application.id = %id,
                result = result.as_str(),
                error = action.error.as_deref().unwrap_or_default(),
                "rollback did not restore every file"
            ),
        }
        metrics::increment_counter!(
            "self_healing_rollbacks_total",
            "result" => result.as_str(),
            "automatic" => if automatic { "true" } else { "false" }
        );
        Ok(action)
    }

    /// Periodic sweep over applications still in `monitoring`.
    ///
    /// Rate-limited rollbacks are logged and skipped; the application stays
    /// in `monitoring` for the next sweep.
    #[instrument(name = "self_healing_sweep", skip(self))]
    pub async fn run_auto_heal(&self) -> Result<Vec<RollbackAction>> {
        if !self.config.enabled {
            debug!("self-healing disabled; sweep skipped");
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let window = self.config.monitoring_window();
        let grace = self.config.grace_period();

        let candidates: Vec<String> = state
            .applications
            .iter()
            .filter(|a| a.status == ApplicationStatus::Monitoring)
            .map(|a| a.id.clone())
            .collect();

        let mut actions = Vec::new();
        let mut dirty = false;

        for id in candidates {
            let Some(application) = state.applications.iter_mut().find(|a| a.id == id) else {
                continue;
            };
            let elapsed = now - application.applied_at;
            if elapsed < grace {
                continue;
            }
            let Some(result) = self.evaluate(application) else {
                continue;
            };
            application.last_evaluation = Some(result.clone());
            dirty = true;
            let window_elapsed = elapsed >= window;

            match result.recommendation {
                Recommendation::Rollback if self.config.auto_rollback_enabled => {
                    let reason = format!(
                        "automatic rollback: severity {:.0} ({})",
                        result.severity,
                        result.reasons.join("; ")
                    );
                    match self
                        .rollback_locked(&mut state, &id, &reason, true, AUTO_HEAL_TRIGGER)
                        .await
                    {
                        Ok(action) => actions.push(action),
                        Err(err) if err.is_rate_limited() => {
                            warn!(application.id = %id, error = %err, "rollback deferred")
                        }
                        Err(err) => return Err(err),
                    }
                }
                Recommendation::Rollback => {
                    info!(application.id = %id, severity = result.severity, "degraded; automatic rollback disabled");
                    application.status = ApplicationStatus::Degraded;
                }
                Recommendation::Monitor if window_elapsed => {
                    application.status = ApplicationStatus::NeedsReview;
                }
                Recommendation::Ignore if window_elapsed => {
                    info!(application.id = %id, "application effective");
                    application.status = ApplicationStatus::Effective;
                }
                Recommendation::Monitor | Recommendation::Ignore => {}
            }
        }

        if dirty {
            self.save(&state).await?;
        }
        Ok(actions)
    }

    pub async fn statistics(&self) -> HealingStatistics {
        let state = self.state.lock().await;
        let today = self.clock.now().date_naive();
        let count = |status: ApplicationStatus| state.applications.iter().filter(|a| a.status == status).count();

        let automatic_today = automatic_rollbacks_on(&state.rollback_log, today);
        HealingStatistics {
            total: state.applications.len(),
            monitoring: count(ApplicationStatus::Monitoring),
            effective: count(ApplicationStatus::Effective),
            degraded: count(ApplicationStatus::Degraded),
            rolled_back: count(ApplicationStatus::RolledBack),
            needs_review: count(ApplicationStatus::NeedsReview),
            rollbacks_today: state
                .rollback_log
                .iter()
                .filter(|a| a.timestamp.date_naive() == today)
                .count(),
            automatic_rollbacks_today: automatic_today,
            remaining_automatic_rollbacks_today: (self.config.max_daily_rollbacks as usize)
                .saturating_sub(automatic_today),
        }
    }

    pub async fn applications(&self) -> Vec<ProposalApplication> {
        self.state.lock().await.applications.clone()
    }

    pub async fn application(&self, id: &str) -> Option<ProposalApplication> {
        self.state
            .lock()
            .await
            .applications
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    /// Applications still waiting for a verdict.
    pub async fn monitored_applications(&self) -> Vec<ProposalApplication> {
        self.state
            .lock()
            .await
            .applications
            .iter()
            .filter(|a| a.status == ApplicationStatus::Monitoring)
            .cloned()
            .collect()
    }

    pub async fn rollback_log(&self) -> Vec<RollbackAction> {
        self.state.lock().await.rollback_log.clone()
    }

    async fn save(&self, state: &State) -> Result<()> {
        let applications = serde_json::to_vec_pretty(&state.applications)?;
        write_atomic(&self.data_dir.join(APPLICATIONS_FILE), &applications).await?;
        let log = serde_json::to_vec_pretty(&state.rollback_log)?;
        write_atomic(&self.data_dir.join(ROLLBACK_LOG_FILE), &log).await?;
        Ok(())
    }
}

fn find_mut<'a>(state: &'a mut State, id: &str) -> Result<&'a mut ProposalApplication> {
    state
        .applications
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| HealingError::NotFound(id.to_string()))
}

fn automatic_rollbacks_on(log: &[RollbackAction], date: NaiveDate) -> usize {
    log.iter()
        .filter(|a| a.automatic && a.timestamp.date_naive() == date)
        .count()
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(err.into()),
    }
}
