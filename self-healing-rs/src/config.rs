// self-healing-rs/src/config.rs
// Monitoring thresholds, loaded from config.yaml in the data directory.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::info;

use governance_types::fs::write_atomic;

use crate::{HealingError, Result};

pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelfHealingConfig {
    pub enabled: bool,
    pub auto_rollback_enabled: bool,
    pub monitoring_window_hours: u32,
    /// After-metrics sampled from fewer tasks are not evaluated.
    pub min_task_count: u64,
    /// Percentage points.
    pub success_rate_drop_threshold: f64,
    pub cost_increase_threshold_pct: f64,
    pub duration_increase_threshold_pct: f64,
    pub max_daily_rollbacks: u32,
}

impl Default for SelfHealingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_rollback_enabled: true,
            monitoring_window_hours: 24,
            min_task_count: 10,
            success_rate_drop_threshold: 10.0,
            cost_increase_threshold_pct: 20.0,
            duration_increase_threshold_pct: 30.0,
            max_daily_rollbacks: 3,
        }
    }
}

impl SelfHealingConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml_bw::from_str(text).map_err(|e| HealingError::Config(e.to_string()))
    }

    /// Read `<data_dir>/config.yaml`, writing the defaults there first when
    /// the file does not exist.
    pub async fn load_or_init(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Self::from_yaml_str(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                let yaml = serde_yaml_bw::to_string(&config).map_err(|e| HealingError::Config(e.to_string()))?;
                write_atomic(&path, yaml.as_bytes()).await?;
                info!(path = %path.display(), "wrote default self-healing config");
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn monitoring_window(&self) -> Duration {
        Duration::hours(i64::from(self.monitoring_window_hours))
    }

    /// Applications younger than this are never evaluated.
    pub fn grace_period(&self) -> Duration {
        self.monitoring_window() / 4
    }
}
