// governance-loop-rs/src/config.rs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use governance_types::AutonomyLevel;
use proposal_apply::engine::GOVERNANCE_DIR;
use proposal_apply::ApplyEngineConfig;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceLoopConfig {
    pub autonomy_level: AutonomyLevel,
    /// Buffered signals needed to start a cycle.
    pub signal_threshold: usize,
    pub council_review_enabled: bool,
}

impl Default for GovernanceLoopConfig {
    fn default() -> Self {
        Self {
            autonomy_level: AutonomyLevel::Manual,
            signal_threshold: 5,
            council_review_enabled: true,
        }
    }
}

impl GovernanceLoopConfig {
    /// Defaults overridden by environment variables:
    /// - GOVERNANCE_AUTONOMY_LEVEL: 0 | 1 | 2
    /// - GOVERNANCE_SIGNAL_THRESHOLD: at least 1
    /// - GOVERNANCE_COUNCIL_ENABLED: "1", "true", "yes", "on" => true
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(raw) = std::env::var("GOVERNANCE_AUTONOMY_LEVEL") {
            match raw.trim().parse::<u8>().map(AutonomyLevel::try_from) {
                Ok(Ok(level)) => cfg.autonomy_level = level,
                _ => warn!(value = %raw, "ignoring invalid GOVERNANCE_AUTONOMY_LEVEL"),
            }
        }
        if let Some(threshold) = std::env::var("GOVERNANCE_SIGNAL_THRESHOLD")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
        {
            cfg.signal_threshold = threshold.max(1);
        }
        if let Ok(raw) = std::env::var("GOVERNANCE_COUNCIL_ENABLED") {
            cfg.council_review_enabled = is_truthy(&raw);
        }

        cfg
    }
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Where the daemon keeps its state for one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GovernancePaths {
    pub project_root: PathBuf,
    pub governance_dir: PathBuf,
    pub proposals_dir: PathBuf,
    pub self_healing_dir: PathBuf,
    /// NDJSON task log read by [`crate::TaskLogMetricsSource`].
    pub task_log: PathBuf,
}

impl GovernancePaths {
    pub fn for_project(root: impl AsRef<Path>) -> Self {
        let project_root = root.as_ref().to_path_buf();
        let governance_dir = project_root.join(GOVERNANCE_DIR);
        Self {
            proposals_dir: governance_dir.join("proposals"),
            self_healing_dir: governance_dir.join("self-healing"),
            task_log: governance_dir.join("metrics").join("tasks.ndjson"),
            governance_dir,
            project_root,
        }
    }

    /// Project root from GOVERNANCE_PROJECT_ROOT, defaulting to the working
    /// directory.
    pub fn from_env() -> Self {
        Self::for_project(ApplyEngineConfig::from_env().project_root)
    }

    pub fn engine_config(&self) -> ApplyEngineConfig {
        ApplyEngineConfig::for_project(&self.project_root)
    }
}
