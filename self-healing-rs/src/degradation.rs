// self-healing-rs/src/degradation.rs
// Before/after regression scoring.
//
// A breached success-rate threshold contributes 50 points, cost and
// duration breaches 25 each, capped at 100 in total. A breach is strictly
// greater than the threshold; a zero baseline never breaches.

use serde::{Deserialize, Serialize};

use governance_types::PerformanceMetrics;

use crate::config::SelfHealingConfig;

const SUCCESS_RATE_WEIGHT: f64 = 50.0;
const COST_WEIGHT: f64 = 25.0;
const DURATION_WEIGHT: f64 = 25.0;

/// Severity at or above which a rollback is recommended.
pub const ROLLBACK_SEVERITY: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Rollback,
    Monitor,
    Ignore,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Recommendation::Rollback => "rollback",
            Recommendation::Monitor => "monitor",
            Recommendation::Ignore => "ignore",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradationResult {
    pub degraded: bool,
    /// 0..=100
    pub severity: f64,
    pub recommendation: Recommendation,
    /// Percentage points lost (negative when the rate improved).
    pub success_rate_drop: f64,
    /// `None` when the baseline was zero.
    pub cost_increase_pct: Option<f64>,
    pub duration_increase_pct: Option<f64>,
    pub reasons: Vec<String>,
}

pub fn score(
    before: &PerformanceMetrics,
    after: &PerformanceMetrics,
    config: &SelfHealingConfig,
) -> DegradationResult {
    let success_rate_drop = (before.success_rate - after.success_rate) * 100.0;
    let cost_increase_pct = pct_increase(before.average_cost, after.average_cost);
    let duration_increase_pct = pct_increase(before.average_duration_ms, after.average_duration_ms);

    let mut severity = 0.0;
    let mut reasons = Vec::new();

    if let Some(points) = contribution(
        success_rate_drop,
        config.success_rate_drop_threshold,
        SUCCESS_RATE_WEIGHT,
    ) {
        severity += points;
        reasons.push(format!(
            "success rate dropped {:.1} points (threshold {:.1})",
            success_rate_drop, config.success_rate_drop_threshold
        ));
    }
    if let Some(increase) = cost_increase_pct {
        if let Some(points) = contribution(increase, config.cost_increase_threshold_pct, COST_WEIGHT) {
            severity += points;
            reasons.push(format!(
                "average cost rose {:.1}% (threshold {:.1}%)",
                increase, config.cost_increase_threshold_pct
            ));
        }
    }
    if let Some(increase) = duration_increase_pct {
        if let Some(points) = contribution(
            increase,
            config.duration_increase_threshold_pct,
            DURATION_WEIGHT,
        ) {
            severity += points;
            reasons.push(format!(
                "average duration rose {:.1}% (threshold {:.1}%)",
                increase, config.duration_increase_threshold_pct
            ));
        }
    }

    let severity: f64 = severity.min(100.0);
    let recommendation = if severity >= ROLLBACK_SEVERITY {
        Recommendation::Rollback
    } else if severity > 0.0 {
        Recommendation::Monitor
    } else {
        Recommendation::Ignore
    };

    DegradationResult {
        degraded: severity > 0.0,
        severity,
        recommendation,
        success_rate_drop,
        cost_increase_pct,
        duration_increase_pct,
        reasons,
    }
}

fn pct_increase(before: f64, after: f64) -> Option<f64> {
    (before > 0.0).then(|| (after - before) / before * 100.0)
}

fn contribution(value: f64, threshold: f64, weight: f64) -> Option<f64> {
    (value > threshold).then_some(weight)
}
