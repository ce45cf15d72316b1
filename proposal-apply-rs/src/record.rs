// proposal-apply-rs/src/record.rs
// Applied records, their markdown summary and the NDJSON audit log.
//
// Layout under the applied directory:
//   <record-id>.json   machine-readable record, written once
//   <record-id>.md     human summary
//   backups/<record-id>/...   pre-images
//   audit.log          one JSON event per line, append-only

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::{ApplyError, Result};

pub const AUDIT_LOG_FILE: &str = "audit.log";
pub const BACKUPS_DIR: &str = "backups";

pub const EVENT_APPLIED: &str = "proposal.applied";
pub const EVENT_ROLLED_BACK: &str = "proposal.rolledBack";

/// Pre-image of one file touched by an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntry {
    /// Target path relative to the project root.
    pub path: String,
    pub existed: bool,
    /// Backup copy relative to the applied directory; set when `existed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_rel_path: Option<String>,
}

/// Durable receipt of a successful application, and the only input to
/// rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    pub proposal_dir_rel: String,
    pub applied_at: DateTime<Utc>,
    pub changed_files: Vec<String>,
    pub backup_files: Vec<BackupEntry>,
}

impl AppliedRecord {
    /// `<UTC yyyymmddTHHMMSS>-<8 hex>`
    pub fn new_id(at: DateTime<Utc>) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", at.format("%Y%m%dT%H%M%S"), &suffix[..8])
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| ApplyError::InvalidRecord {
            record_id: self.id.clone(),
            message,
        };

        if !is_valid_record_id(&self.id) {
            return Err(invalid("malformed record id".to_string()));
        }
        if self.changed_files.is_empty() {
            return Err(invalid("record lists no changed files".to_string()));
        }
        for entry in &self.backup_files {
            if !is_plain_relative(&entry.path) {
                return Err(invalid(format!("backup target '{}' is not relative", entry.path)));
            }
            if let Some(rel) = &entry.backup_rel_path {
                if !is_plain_relative(rel) {
                    return Err(invalid(format!("backup copy '{rel}' is not relative")));
                }
            }
        }
        for file in &self.changed_files {
            if !self.backup_files.iter().any(|b| &b.path == file) {
                return Err(invalid(format!("changed file '{file}' has no backup entry")));
            }
        }
        Ok(())
    }

    pub fn summary_markdown(&self) -> String {
        let mut out = format!("# Applied proposal {}\n\n", self.id);
        if let Some(pid) = &self.proposal_id {
            out.push_str(&format!("- Proposal: `{pid}`\n"));
        }
        out.push_str(&format!("- Source: `{}`\n", self.proposal_dir_rel));
        out.push_str(&format!("- Applied at: {}\n\n", self.applied_at.to_rfc3339()));
        out.push_str("## Changed files\n\n");
        for entry in &self.backup_files {
            let note = if entry.existed { "modified" } else { "created" };
            out.push_str(&format!("- `{}` ({note})\n", entry.path));
        }
        out.push_str(&format!(
            "\nRoll back with `governance-daemon rollback {}`.\n",
            self.id
        ));
        out
    }
}

/// Record ids double as file names, so only `[0-9A-Za-z-]` is accepted.
pub fn is_valid_record_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn is_plain_relative(path: &str) -> bool {
    !path.is_empty()
        && Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// One line of the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event: String,
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposal_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub files: Vec<String>,
    /// `false` for a rollback that left files unrestored.
    #[serde(default = "default_complete")]
    pub complete: bool,
}

fn default_complete() -> bool {
    true
}

pub(crate) fn record_path(applied_dir: &Path, record_id: &str) -> PathBuf {
    applied_dir.join(format!("{record_id}.json"))
}

pub(crate) fn summary_path(applied_dir: &Path, record_id: &str) -> PathBuf {
    applied_dir.join(format!("{record_id}.md"))
}

pub(crate) async fn append_audit_event(applied_dir: &Path, event: &AuditEvent) -> Result<()> {
    fs::create_dir_all(applied_dir).await?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(applied_dir.join(AUDIT_LOG_FILE))
        .await?;

    let line = serde_json::to_string(event)?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(())
}

/// All audit events in append order. Unparsable lines are skipped.
pub async fn read_audit_log(applied_dir: &Path) -> Result<Vec<AuditEvent>> {
    let text = match fs::read_to_string(applied_dir.join(AUDIT_LOG_FILE)).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut events = Vec::new();
    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<AuditEvent>(line) {
            Ok(event) => events.push(event),
            Err(err) => warn!(error = %err, "skipping unparsable audit line"),
        }
    }
    Ok(events)
}

pub async fn load_record(applied_dir: &Path, record_id: &str) -> Result<AppliedRecord> {
    if !is_valid_record_id(record_id) {
        return Err(ApplyError::InvalidRecord {
            record_id: record_id.to_string(),
            message: "malformed record id".to_string(),
        });
    }

    let text = match fs::read_to_string(record_path(applied_dir, record_id)).await {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApplyError::RecordNotFound(record_id.to_string()))
        }
        Err(err) => return Err(err.into()),
    };

    let record: AppliedRecord = serde_json::from_str(&text).map_err(|e| ApplyError::InvalidRecord {
        record_id: record_id.to_string(),
        message: e.to_string(),
    })?;
    if record.id != record_id {
        return Err(ApplyError::InvalidRecord {
            record_id: record_id.to_string(),
            message: format!("file holds record {}", record.id),
        });
    }
    record.validate()?;
    Ok(record)
}

/// Every valid record, oldest first. Invalid files are skipped with a warning.
pub async fn list_applied_records(applied_dir: &Path) -> Result<Vec<AppliedRecord>> {
    let mut entries = match fs::read_dir(applied_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut records = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        match load_record(applied_dir, id).await {
            Ok(record) => records.push(record),
            Err(err) => warn!(path = %path.display(), error = %err, "skipping invalid applied record"),
        }
    }
    records.sort_by(|a, b| a.applied_at.cmp(&b.applied_at).then_with(|| a.id.cmp(&b.id)));
    Ok(records)
}
