// governance-loop-rs/src/store.rs
// Proposal persistence keyed by proposal id.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::warn;

use governance_types::fs::write_atomic;
use governance_types::Proposal;

use crate::Result;

#[async_trait]
pub trait ProposalStore: Send + Sync {
    /// Insert or replace.
    async fn save(&self, proposal: &Proposal) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Proposal>>;

    /// Every stored proposal, oldest first.
    async fn list(&self) -> Result<Vec<Proposal>>;
}

#[derive(Default)]
pub struct InMemoryProposalStore {
    proposals: RwLock<BTreeMap<String, Proposal>>,
}

impl InMemoryProposalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProposalStore for InMemoryProposalStore {
    async fn save(&self, proposal: &Proposal) -> Result<()> {
        self.proposals
            .write()
            .await
            .insert(proposal.id.clone(), proposal.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Proposal>> {
        Ok(self.proposals.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<Proposal>> {
        let mut all: Vec<Proposal> = self.proposals.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

/// One `<id>.json` document per proposal under a directory.
pub struct JsonFileProposalStore {
    dir: PathBuf,
}

impl JsonFileProposalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Option<PathBuf> {
        is_storable_id(id).then(|| self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl ProposalStore for JsonFileProposalStore {
    async fn save(&self, proposal: &Proposal) -> Result<()> {
        let path = self.path_for(&proposal.id).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("proposal id '{}' cannot be used as a file name", proposal.id),
            )
        })?;
        let json = serde_json::to_vec_pretty(proposal)?;
        write_atomic(&path, &json).await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Proposal>> {
        let Some(path) = self.path_for(id) else {
            return Ok(None);
        };
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<Proposal>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut all = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path).await?;
            match serde_json::from_slice::<Proposal>(&bytes) {
                Ok(proposal) => all.push(proposal),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable proposal"),
            }
        }
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }
}

fn is_storable_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
