// governance-types-rs/src/signal.rs
// Observed behavior signals produced by an external detector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An observed event suggesting a behavior pattern worth addressing.
///
/// Signals are immutable once created and are consumed exactly once by the
/// orchestration loop's buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    /// Detector-defined category, e.g. `repeated_tool_failure`.
    #[serde(rename = "type")]
    pub signal_type: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
    pub description: String,
    #[serde(default)]
    pub source_event_ids: Vec<String>,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl Signal {
    /// Build a new signal with a fresh id. Confidence is clamped into `[0, 1]`.
    pub fn new(signal_type: impl Into<String>, confidence: f64, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            signal_type: signal_type.into(),
            confidence: clamp_unit(confidence),
            description: description.into(),
            source_event_ids: Vec::new(),
            detected_at: Utc::now(),
            context: None,
        }
    }

    pub fn with_source_events(mut self, ids: Vec<String>) -> Self {
        self.source_event_ids = ids;
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
