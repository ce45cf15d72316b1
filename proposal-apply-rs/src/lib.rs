//! # Proposal Apply
//!
//! Applies ratified proposals to the project tree as an all-or-nothing
//! multi-file transaction and reverts them on demand.
//!
//! A proposal directory holds unified diffs (`*.diff` / `*.patch`) and an
//! optional `proposal*.json` document. The engine:
//! - checks every change against the site policy (`.governance/policy.yaml`),
//! - backs up each target before touching it,
//! - applies the diffs with atomic writes, restoring every backup on the
//!   first failure,
//! - and, only after full success, persists an [`AppliedRecord`], a
//!   markdown summary and an audit-log line.
//!
//! [`ProposalApplyEngine::rollback_proposal`] replays a record's backups in
//! reverse. Missing backup data is reported as an error, never skipped.

pub mod engine;
pub mod parser;
pub mod patch;
pub mod policy;
pub mod record;

#[cfg(test)]
mod tests;

pub use engine::{ApplyEngineConfig, ApplyOutcome, FileFailure, ProposalApplyEngine, RollbackReport};
pub use parser::{parse_proposal, ChangeKind, FileChange, ParsedProposal, ProposalDocument};
pub use patch::{parse_unified_diff, FilePatch, Hunk, HunkLine, PatchError};
pub use policy::{Eligibility, SitePolicy, AUTO_APPLY_LOW_RISK};
pub use record::{AppliedRecord, AuditEvent, BackupEntry};

/// Result type used by this crate.
pub type Result<T> = std::result::Result<T, ApplyError>;

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("failed to parse {file}: {message}")]
    Parse { file: String, message: String },

    #[error("proposal is not eligible to apply: {0}")]
    Ineligible(String),

    #[error("invalid applied record {record_id}: {message}")]
    InvalidRecord { record_id: String, message: String },

    #[error("applied record {0} not found")]
    RecordNotFound(String),

    #[error("applied record {0} has already been rolled back")]
    AlreadyRolledBack(String),

    #[error("path '{0}' resolves outside the project root")]
    PathEscape(String),

    #[error("patch for {path} does not apply: {source}")]
    Patch {
        path: String,
        #[source]
        source: PatchError,
    },

    #[error("backup data missing for {path} (record {record_id})")]
    MissingBackup {
        record_id: String,
        path: String,
        report: Box<RollbackReport>,
    },

    #[error("rollback of {record_id} incomplete: {} file(s) not restored", .report.failures.len())]
    RollbackIncomplete {
        record_id: String,
        report: Box<RollbackReport>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
