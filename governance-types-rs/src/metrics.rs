// governance-types-rs/src/metrics.rs
// Aggregate task performance snapshots compared before/after a change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signal::clamp_unit;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    /// Fraction of successful tasks in `[0, 1]`.
    pub success_rate: f64,
    pub average_cost: f64,
    pub average_duration_ms: f64,
    pub task_count: u64,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceMetrics {
    pub fn new(success_rate: f64, average_cost: f64, average_duration_ms: f64, task_count: u64) -> Self {
        Self {
            success_rate: clamp_unit(success_rate),
            average_cost,
            average_duration_ms,
            task_count,
            timestamp: Utc::now(),
        }
    }
}
