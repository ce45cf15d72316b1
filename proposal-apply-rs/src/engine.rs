// proposal-apply-rs/src/engine.rs
// All-or-nothing application of proposal directories, and its inverse.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, instrument, warn};

use governance_types::fs::write_atomic;
use governance_types::{Clock, SystemClock};

use crate::parser::{self, ChangeKind, FileChange, ParsedProposal};
use crate::patch::PatchError;
use crate::policy::{normalize, SitePolicy};
use crate::record::{
    self, append_audit_event, AppliedRecord, AuditEvent, BackupEntry, BACKUPS_DIR, EVENT_APPLIED,
    EVENT_ROLLED_BACK,
};
use crate::{ApplyError, Result};

pub const GOVERNANCE_DIR: &str = ".governance";

/// Filesystem locations used by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyEngineConfig {
    pub project_root: PathBuf,
    pub applied_dir: PathBuf,
    pub policy_path: PathBuf,
}

impl ApplyEngineConfig {
    /// Standard layout under `<root>/.governance`.
    pub fn for_project(root: impl Into<PathBuf>) -> Self {
        let project_root = root.into();
        let governance_dir = project_root.join(GOVERNANCE_DIR);
        Self {
            applied_dir: governance_dir.join("applied"),
            policy_path: governance_dir.join("policy.yaml"),
            project_root,
        }
    }

    /// Project root from GOVERNANCE_PROJECT_ROOT, defaulting to the working
    /// directory.
    pub fn from_env() -> Self {
        let root = std::env::var("GOVERNANCE_PROJECT_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::for_project(root)
    }
}

/// Result of an application attempt. Failures are reported here, not as
/// `Err`: by the time this is returned every touched file is restored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_record_id: Option<String>,
    pub changed_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ApplyOutcome {
    fn failed(errors: Vec<String>) -> Self {
        Self {
            applied: false,
            applied_record_id: None,
            changed_files: Vec::new(),
            errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub path: String,
    pub error: String,
    /// The record claims a pre-image that is not on disk.
    pub missing_backup: bool,
}

/// Per-file outcome of replaying backups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackReport {
    pub record_id: String,
    /// Files rewritten from their backup.
    pub restored: Vec<String>,
    /// Files removed because they did not exist before.
    pub removed: Vec<String>,
    pub failures: Vec<FileFailure>,
}

impl RollbackReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn touched_files(&self) -> Vec<String> {
        self.restored.iter().chain(&self.removed).cloned().collect()
    }
}

pub struct ProposalApplyEngine {
    config: ApplyEngineConfig,
    clock: Arc<dyn Clock>,
}

impl ProposalApplyEngine {
    pub fn new(config: ApplyEngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ApplyEngineConfig {
        &self.config
    }

    /// Parse a proposal directory; relative paths resolve against the
    /// project root.
    pub async fn parse_proposal(&self, dir: &Path) -> Result<ParsedProposal> {
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.config.project_root.join(dir)
        };
        parser::parse_proposal(&dir).await
    }

    /// The site policy as it is on disk right now.
    pub async fn load_policy(&self) -> SitePolicy {
        SitePolicy::load(&self.config.policy_path).await
    }

    pub async fn can_auto_apply(&self, parsed: &ParsedProposal) -> bool {
        self.load_policy().await.can_auto_apply(parsed)
    }

    pub async fn can_apply_with_approval(&self, parsed: &ParsedProposal) -> bool {
        self.load_policy().await.can_apply_with_approval(parsed)
    }

    /// Apply every change of `parsed` or none of them.
    ///
    /// Eligibility is re-checked against the current policy. The record,
    /// summary and audit line are written only after every change landed.
    #[instrument(
        name = "apply_proposal",
        skip(self, parsed),
        fields(dir = %parsed.dir.display(), changes = parsed.changes.len())
    )]
    pub async fn apply_proposal(&self, parsed: &ParsedProposal) -> Result<ApplyOutcome> {
        let eligibility = self.load_policy().await.check(parsed);
        if !eligibility.eligible {
            warn!(reasons = ?eligibility.reasons, "proposal not eligible; nothing applied");
            record_application("ineligible");
            return Ok(ApplyOutcome::failed(eligibility.reasons));
        }

        let applied_at = self.clock.now();
        let record_id = AppliedRecord::new_id(applied_at);
        let mut backups = Vec::with_capacity(parsed.changes.len());
        let mut changed = Vec::with_capacity(parsed.changes.len());

        for change in &parsed.changes {
            match self.apply_change(change, &record_id, &mut backups).await {
                Ok(path) => {
                    if !changed.contains(&path) {
                        changed.push(path);
                    }
                }
                Err(err) => {
                    warn!(path = %change.path, error = %err, "change failed; restoring backups");
                    let mut errors = vec![err.to_string()];
                    errors.extend(self.unwind(&record_id, &backups).await);
                    record_application("failed");
                    return Ok(ApplyOutcome::failed(errors));
                }
            }
        }

        let record = AppliedRecord {
            id: record_id.clone(),
            proposal_id: parsed.proposal_id().map(str::to_string),
            proposal_dir_rel: self.relative_to_root(&parsed.dir),
            applied_at,
            changed_files: changed.clone(),
            backup_files: backups,
        };

        if let Err(err) = self.persist(&record).await {
            warn!(error = %err, "could not persist applied record; restoring backups");
            let mut errors = vec![format!("failed to persist applied record: {err}")];
            errors.extend(self.unwind(&record_id, &record.backup_files).await);
            let _ = fs::remove_file(record::record_path(&self.config.applied_dir, &record_id)).await;
            let _ = fs::remove_file(record::summary_path(&self.config.applied_dir, &record_id)).await;
            record_application("failed");
            return Ok(ApplyOutcome::failed(errors));
        }

        info!(record_id = %record_id, files = ?changed, "proposal applied");
        record_application("applied");

        Ok(ApplyOutcome {
            applied: true,
            applied_record_id: Some(record_id),
            changed_files: changed,
            errors: Vec::new(),
        })
    }

    /// Restore the pre-images captured by an applied record.
    ///
    /// Every file that can be restored is, before any error is returned.
    #[instrument(name = "rollback_proposal", skip(self))]
    pub async fn rollback_proposal(&self, record_id: &str) -> Result<RollbackReport> {
        let record = self.load_record(record_id).await?;
        if self.is_rolled_back(record_id).await? {
            return Err(ApplyError::AlreadyRolledBack(record_id.to_string()));
        }

        let report = self.restore_entries(record_id, &record.backup_files).await;

        append_audit_event(
            &self.config.applied_dir,
            &AuditEvent {
                event: EVENT_ROLLED_BACK.to_string(),
                record_id: record_id.to_string(),
                proposal_id: record.proposal_id.clone(),
                timestamp: self.clock.now(),
                files: report.touched_files(),
                complete: report.is_complete(),
            },
        )
        .await?;

        metrics::increment_counter!(
            "proposal_rollbacks_total",
            "outcome" => if report.is_complete() { "complete" } else { "incomplete" }
        );

        if let Some(missing) = report.failures.iter().find(|f| f.missing_backup) {
            let path = missing.path.clone();
            return Err(ApplyError::MissingBackup {
                record_id: record_id.to_string(),
                path,
                report: Box::new(report),
            });
        }
        if !report.is_complete() {
            return Err(ApplyError::RollbackIncomplete {
                record_id: record_id.to_string(),
                report: Box::new(report),
            });
        }

        info!(restored = report.restored.len(), removed = report.removed.len(), "proposal rolled back");
        Ok(report)
    }

    pub async fn load_record(&self, record_id: &str) -> Result<AppliedRecord> {
        record::load_record(&self.config.applied_dir, record_id).await
    }

    pub async fn list_applied_records(&self) -> Result<Vec<AppliedRecord>> {
        record::list_applied_records(&self.config.applied_dir).await
    }

    pub async fn read_audit_log(&self) -> Result<Vec<AuditEvent>> {
        record::read_audit_log(&self.config.applied_dir).await
    }

    /// Whether a complete rollback of `record_id` is on the audit log.
    pub async fn is_rolled_back(&self, record_id: &str) -> Result<bool> {
        Ok(self
            .read_audit_log()
            .await?
            .iter()
            .any(|e| e.event == EVENT_ROLLED_BACK && e.record_id == record_id && e.complete))
    }

    async fn apply_change(
        &self,
        change: &FileChange,
        record_id: &str,
        backups: &mut Vec<BackupEntry>,
    ) -> Result<String> {
        let (rel, target) = self.resolve(&change.path).await?;
        let patch = change
            .patch
            .as_ref()
            .ok_or_else(|| ApplyError::Ineligible(format!("{rel}: no patch text")))?;

        let current = match fs::read(&target).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        // Backup first: nothing below may run before the pre-image is safe.
        // Only the first touch of a path holds its pre-image.
        let seen = backups.iter().any(|b| b.path == rel);
        match &current {
            _ if seen => {}
            Some(bytes) => {
                let backup_rel = format!("{BACKUPS_DIR}/{record_id}/{rel}");
                write_atomic(&self.config.applied_dir.join(&backup_rel), bytes).await?;
                backups.push(BackupEntry {
                    path: rel.clone(),
                    existed: true,
                    backup_rel_path: Some(backup_rel),
                });
            }
            None => backups.push(BackupEntry {
                path: rel.clone(),
                existed: false,
                backup_rel_path: None,
            }),
        }

        let current_text = current
            .map(|bytes| {
                String::from_utf8(bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("{rel}: {e}")))
            })
            .transpose()?;

        let patch_err = |source: PatchError| ApplyError::Patch {
            path: rel.clone(),
            source,
        };
        match (change.kind, current_text.is_some()) {
            (ChangeKind::Create, true) => return Err(patch_err(PatchError::TargetExists)),
            (ChangeKind::Modify | ChangeKind::Delete, false) => {
                return Err(patch_err(PatchError::TargetMissing))
            }
            _ => {}
        }

        match patch.apply(current_text.as_deref()).map_err(patch_err)? {
            Some(content) => write_atomic(&target, content.as_bytes()).await?,
            None => fs::remove_file(&target).await?,
        }

        debug!(path = %rel, kind = change.kind.as_str(), "change applied");
        Ok(rel)
    }

    /// Undo a failed transaction. Returns a message per file left unrestored.
    async fn unwind(&self, record_id: &str, backups: &[BackupEntry]) -> Vec<String> {
        let report = self.restore_entries(record_id, backups).await;
        let _ = fs::remove_dir_all(self.config.applied_dir.join(BACKUPS_DIR).join(record_id)).await;

        report
            .failures
            .into_iter()
            .map(|f| format!("rollback of {} failed: {}", f.path, f.error))
            .collect()
    }

    /// Replay backups newest-first, accumulating per-file outcomes.
    async fn restore_entries(&self, record_id: &str, entries: &[BackupEntry]) -> RollbackReport {
        let mut report = RollbackReport {
            record_id: record_id.to_string(),
            ..RollbackReport::default()
        };

        for entry in entries.iter().rev() {
            let target = self.config.project_root.join(&entry.path);

            if !entry.existed {
                match fs::remove_file(&target).await {
                    Ok(()) => {
                        self.prune_empty_parents(&target).await;
                        report.removed.push(entry.path.clone());
                    }
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => report.failures.push(FileFailure {
                        path: entry.path.clone(),
                        error: err.to_string(),
                        missing_backup: false,
                    }),
                }
                continue;
            }

            let Some(backup_rel) = &entry.backup_rel_path else {
                report.failures.push(FileFailure {
                    path: entry.path.clone(),
                    error: "record has no backup path".to_string(),
                    missing_backup: true,
                });
                continue;
            };

            let restored = match fs::read(self.config.applied_dir.join(backup_rel)).await {
                Ok(bytes) => write_atomic(&target, &bytes).await.map_err(|e| (e, false)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => Err((err, true)),
                Err(err) => Err((err, false)),
            };
            match restored {
                Ok(()) => report.restored.push(entry.path.clone()),
                Err((err, missing_backup)) => {
                    warn!(path = %entry.path, error = %err, missing_backup, "file not restored");
                    report.failures.push(FileFailure {
                        path: entry.path.clone(),
                        error: err.to_string(),
                        missing_backup,
                    });
                }
            }
        }

        report
    }

    /// Remove directories left empty below the project root.
    async fn prune_empty_parents(&self, removed: &Path) {
        let root = &self.config.project_root;
        let mut dir = removed.parent();
        while let Some(current) = dir {
            if current == root.as_path() || !current.starts_with(root) {
                break;
            }
            // Fails on a non-empty directory, which ends the walk.
            if fs::remove_dir(current).await.is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    async fn persist(&self, record: &AppliedRecord) -> Result<()> {
        let dir = &self.config.applied_dir;
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&record::record_path(dir, &record.id), &json).await?;
        write_atomic(
            &record::summary_path(dir, &record.id),
            record.summary_markdown().as_bytes(),
        )
        .await?;
        append_audit_event(
            dir,
            &AuditEvent {
                event: EVENT_APPLIED.to_string(),
                record_id: record.id.clone(),
                proposal_id: record.proposal_id.clone(),
                timestamp: record.applied_at,
                files: record.changed_files.clone(),
                complete: true,
            },
        )
        .await
    }

    /// Normalised relative path and its absolute location, refusing anything
    /// that resolves outside the project root.
    async fn resolve(&self, path: &str) -> Result<(String, PathBuf)> {
        let rel = normalize(path).ok_or_else(|| ApplyError::PathEscape(path.to_string()))?;
        let target = self.config.project_root.join(&rel);

        // Symlinked ancestors must stay inside the root too.
        let root = fs::canonicalize(&self.config.project_root).await?;
        let mut probe = target.as_path();
        loop {
            match fs::canonicalize(probe).await {
                Ok(real) => {
                    if !real.starts_with(&root) {
                        return Err(ApplyError::PathEscape(path.to_string()));
                    }
                    break;
                }
                Err(_) => match probe.parent() {
                    Some(parent) => probe = parent,
                    None => break,
                },
            }
        }

        Ok((rel, target))
    }

    fn relative_to_root(&self, dir: &Path) -> String {
        dir.strip_prefix(&self.config.project_root)
            .unwrap_or(dir)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn record_application(outcome: &'static str) {
    metrics::increment_counter!("proposal_applications_total", "outcome" => outcome);
}
