// governance-loop-rs/src/metrics_source.rs
// Performance snapshots for before/after comparison.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use governance_types::PerformanceMetrics;

/// Which tasks a snapshot covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsWindow {
    /// Tasks finished strictly before the instant (baseline).
    Before(DateTime<Utc>),
    /// Tasks finished at or after the instant (post-change).
    Since(DateTime<Utc>),
}

impl MetricsWindow {
    fn contains(&self, at: DateTime<Utc>) -> bool {
        match *self {
            MetricsWindow::Before(limit) => at < limit,
            MetricsWindow::Since(start) => at >= start,
        }
    }
}

#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// `None` when no task falls in the window.
    async fn snapshot(&self, window: MetricsWindow) -> Option<PerformanceMetrics>;
}

/// One finished task as recorded by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSample {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub duration_ms: f64,
}

/// Aggregates an NDJSON task log written by the host, one [`TaskSample`]
/// per line. Unparseable lines are skipped.
pub struct TaskLogMetricsSource {
    path: PathBuf,
}

impl TaskLogMetricsSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn samples(&self) -> Vec<TaskSample> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "task log unavailable");
                return Vec::new();
            }
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

#[async_trait]
impl MetricsSource for TaskLogMetricsSource {
    async fn snapshot(&self, window: MetricsWindow) -> Option<PerformanceMetrics> {
        let samples: Vec<TaskSample> = self
            .samples()
            .await
            .into_iter()
            .filter(|s| window.contains(s.timestamp))
            .collect();
        aggregate(&samples)
    }
}

pub fn aggregate(samples: &[TaskSample]) -> Option<PerformanceMetrics> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let successes = samples.iter().filter(|s| s.success).count() as f64;
    let cost: f64 = samples.iter().map(|s| s.cost).sum();
    let duration: f64 = samples.iter().map(|s| s.duration_ms).sum();
    Some(PerformanceMetrics::new(
        successes / n,
        cost / n,
        duration / n,
        samples.len() as u64,
    ))
}
