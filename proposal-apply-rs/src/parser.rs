// proposal-apply-rs/src/parser.rs
// Reads a proposal directory into the list of file changes it declares.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use governance_types::Risk;

use crate::patch::{parse_unified_diff, FilePatch};
use crate::{ApplyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Create,
    Delete,
    Modify,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Create => "create",
            ChangeKind::Delete => "delete",
            ChangeKind::Modify => "modify",
        }
    }

    fn of(patch: &FilePatch) -> Self {
        if patch.is_creation() {
            ChangeKind::Create
        } else if patch.is_deletion() {
            ChangeKind::Delete
        } else {
            ChangeKind::Modify
        }
    }
}

/// A single file change. `patch` is `None` for changes only declared in the
/// proposal document; those can never be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    /// Target path relative to the project root.
    pub path: String,
    pub kind: ChangeKind,
    pub patch: Option<FilePatch>,
    /// Diff artifact the change came from.
    pub source: Option<PathBuf>,
}

/// Optional `proposal*.json` companion document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProposalDocument {
    #[serde(alias = "proposalId")]
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub risk: Option<Risk>,
    pub changes: Vec<DeclaredChange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredChange {
    pub path: String,
    #[serde(default, alias = "type")]
    pub kind: Option<ChangeKind>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProposal {
    pub dir: PathBuf,
    pub changes: Vec<FileChange>,
    pub document: Option<ProposalDocument>,
}

impl ParsedProposal {
    /// Proposal id declared by the companion document, if any.
    pub fn proposal_id(&self) -> Option<&str> {
        self.document.as_ref().and_then(|d| d.id.as_deref())
    }

    pub fn risk(&self) -> Option<Risk> {
        self.document.as_ref().and_then(|d| d.risk)
    }
}

/// Parse every `*.diff`/`*.patch` artifact in `dir` (in file-name order) and
/// the first `proposal*.json` document.
pub async fn parse_proposal(dir: &Path) -> Result<ParsedProposal> {
    let mut diff_files = Vec::new();
    let mut documents = Vec::new();

    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        match path.extension().and_then(|e| e.to_str()) {
            Some("diff") | Some("patch") => diff_files.push(path),
            Some("json") if name.starts_with("proposal") => documents.push(path),
            _ => {}
        }
    }
    diff_files.sort();
    documents.sort();

    let mut changes = Vec::new();
    for file in &diff_files {
        let text = tokio::fs::read_to_string(file).await?;
        let patches = parse_unified_diff(&text).map_err(|e| ApplyError::Parse {
            file: file.display().to_string(),
            message: e.to_string(),
        })?;
        for patch in patches {
            let path = patch.target_path().unwrap_or_default().to_string();
            changes.push(FileChange {
                path,
                kind: ChangeKind::of(&patch),
                patch: Some(patch),
                source: Some(file.clone()),
            });
        }
    }

    let document = match documents.first() {
        Some(file) => {
            let text = tokio::fs::read_to_string(file).await?;
            let doc: ProposalDocument = serde_json::from_str(&text).map_err(|e| ApplyError::Parse {
                file: file.display().to_string(),
                message: e.to_string(),
            })?;
            Some(doc)
        }
        None => None,
    };

    if let Some(doc) = &document {
        let covered: HashSet<String> = changes.iter().map(|c| c.path.clone()).collect();
        for declared in &doc.changes {
            if covered.contains(&declared.path) {
                continue;
            }
            debug!(path = %declared.path, "declared change has no diff");
            changes.push(FileChange {
                path: declared.path.clone(),
                kind: declared.kind.unwrap_or(ChangeKind::Modify),
                patch: None,
                source: None,
            });
        }
    }

    Ok(ParsedProposal {
        dir: dir.to_path_buf(),
        changes,
        document,
    })
}
