// self-healing-rs/src/reverter.rs
// Bridge from the monitor to whatever can undo an application.

use std::io;
use std::path::{Component, Path};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use governance_types::fs::write_atomic;
use proposal_apply::record::BACKUPS_DIR;
use proposal_apply::{ApplyError, ProposalApplyEngine, RollbackReport};

use crate::model::{ProposalApplication, RollbackResult};

/// Per-file result of a revert. Never an error: whatever could be restored
/// is, and everything else is listed in `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevertOutcome {
    pub restored: Vec<String>,
    /// `(path, error)`
    pub failed: Vec<(String, String)>,
}

impl RevertOutcome {
    pub fn result(&self) -> RollbackResult {
        match (self.restored.is_empty(), self.failed.is_empty()) {
            (_, true) => RollbackResult::Success,
            (false, false) => RollbackResult::Partial,
            (true, false) => RollbackResult::Failed,
        }
    }

    pub fn error_summary(&self) -> Option<String> {
        if self.failed.is_empty() {
            return None;
        }
        Some(
            self.failed
                .iter()
                .map(|(path, err)| format!("{path}: {err}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    fn from_report(report: RollbackReport) -> Self {
        Self {
            restored: report.touched_files(),
            failed: report
                .failures
                .into_iter()
                .map(|f| (f.path, f.error))
                .collect(),
        }
    }
}

#[async_trait]
pub trait ApplicationReverter: Send + Sync {
    /// Capture what `revert` will need, before the application's files change.
    async fn snapshot(&self, _application: &mut ProposalApplication) -> io::Result<()> {
        Ok(())
    }

    async fn revert(&self, application: &ProposalApplication) -> RevertOutcome;
}

/// Reverts through the apply engine's record rollback, falling back to the
/// application's own backup map when no usable record exists.
pub struct EngineReverter {
    engine: Arc<ProposalApplyEngine>,
}

impl EngineReverter {
    pub fn new(engine: Arc<ProposalApplyEngine>) -> Self {
        Self { engine }
    }

    async fn restore_from_backup_paths(&self, application: &ProposalApplication) -> RevertOutcome {
        let config = self.engine.config();
        let mut outcome = RevertOutcome::default();

        for file in application.changed_files.iter().rev() {
            if application.created_files.contains(file) {
                if !is_plain_relative(file) {
                    outcome.failed.push((file.clone(), "refusing non-relative path".to_string()));
                    continue;
                }
                match tokio::fs::remove_file(config.project_root.join(file)).await {
                    Ok(()) => outcome.restored.push(file.clone()),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => outcome.restored.push(file.clone()),
                    Err(err) => outcome.failed.push((file.clone(), err.to_string())),
                }
                continue;
            }
            let Some(backup) = application.backup_paths.get(file) else {
                outcome.failed.push((file.clone(), "no backup recorded".to_string()));
                continue;
            };
            if !is_plain_relative(file) || !is_plain_relative(backup) {
                outcome.failed.push((file.clone(), "refusing non-relative path".to_string()));
                continue;
            }

            let restored = match tokio::fs::read(config.applied_dir.join(backup)).await {
                Ok(bytes) => write_atomic(&config.project_root.join(file), &bytes).await,
                Err(err) => Err(err),
            };
            match restored {
                Ok(()) => outcome.restored.push(file.clone()),
                Err(err) => outcome.failed.push((file.clone(), err.to_string())),
            }
        }
        outcome
    }
}

#[async_trait]
impl ApplicationReverter for EngineReverter {
    /// Copy each existing changed file to `backups/<application id>/` in the
    /// applied-record store; missing files are noted as created.
    async fn snapshot(&self, application: &mut ProposalApplication) -> io::Result<()> {
        let config = self.engine.config();
        for file in &application.changed_files {
            if !is_plain_relative(file) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{file}: refusing non-relative path"),
                ));
            }
            match tokio::fs::read(config.project_root.join(file)).await {
                Ok(bytes) => {
                    let backup = format!("{BACKUPS_DIR}/{}/{file}", application.id);
                    write_atomic(&config.applied_dir.join(&backup), &bytes).await?;
                    application.backup_paths.insert(file.clone(), backup);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    application.created_files.push(file.clone());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn revert(&self, application: &ProposalApplication) -> RevertOutcome {
        if let Some(record_id) = &application.applied_record_id {
            match self.engine.rollback_proposal(record_id).await {
                Ok(report) => return RevertOutcome::from_report(report),
                Err(ApplyError::AlreadyRolledBack(_)) => {
                    return RevertOutcome {
                        restored: application.changed_files.clone(),
                        failed: Vec::new(),
                    }
                }
                Err(ApplyError::MissingBackup { report, .. })
                | Err(ApplyError::RollbackIncomplete { report, .. }) => {
                    return RevertOutcome::from_report(*report)
                }
                Err(err) => {
                    warn!(record_id = %record_id, error = %err, "record rollback unavailable; using backup map");
                    if application.backup_paths.is_empty() {
                        return RevertOutcome {
                            restored: Vec::new(),
                            failed: application
                                .changed_files
                                .iter()
                                .map(|f| (f.clone(), err.to_string()))
                                .collect(),
                        };
                    }
                }
            }
        }
        self.restore_from_backup_paths(application).await
    }
}

fn is_plain_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
