// council-rs/src/config.rs
// Council configuration: aggregation policy, role roster and delegation knobs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use governance_types::CouncilRole;

use crate::aggregator::AggregationPolicy;
use crate::CouncilError;

/// Per-role reviewer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleConfig {
    /// Reviewer profile handed to the profile resolver (e.g. an agent preset).
    #[serde(default)]
    pub profile: String,
    /// Optional prompt template overriding the built-in one.
    #[serde(default)]
    pub prompt_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RoleConfig {
    pub fn for_role(role: CouncilRole) -> Self {
        Self {
            profile: role.as_str().to_string(),
            prompt_path: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilConfig {
    #[serde(default)]
    pub policy: AggregationPolicy,

    #[serde(default = "default_roles")]
    pub roles: BTreeMap<CouncilRole, RoleConfig>,

    /// Per-role delegation timeout in milliseconds.
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,

    /// Agent votes below this confidence are counted as abstentions.
    #[serde(default = "default_min_confidence")]
    pub min_confidence_threshold: f64,

    /// Turn a failed role into an abstention instead of aborting the review.
    #[serde(default = "default_true")]
    pub continue_on_agent_failure: bool,

    /// Use the simulated panel when the multi-agent review cannot run.
    #[serde(default = "default_true")]
    pub fallback_to_simulated: bool,

    /// Reject high-risk proposals outright, pending human review.
    #[serde(default = "default_true")]
    pub reject_high_risk: bool,
}

fn default_true() -> bool {
    true
}

fn default_agent_timeout_ms() -> u64 {
    120_000
}

fn default_min_confidence() -> f64 {
    0.5
}

fn default_roles() -> BTreeMap<CouncilRole, RoleConfig> {
    CouncilRole::ALL
        .into_iter()
        .map(|role| (role, RoleConfig::for_role(role)))
        .collect()
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            policy: AggregationPolicy::default(),
            roles: default_roles(),
            agent_timeout_ms: default_agent_timeout_ms(),
            min_confidence_threshold: default_min_confidence(),
            continue_on_agent_failure: true,
            fallback_to_simulated: true,
            reject_high_risk: true,
        }
    }
}

impl CouncilConfig {
    /// Defaults overridden by environment variables:
    /// - COUNCIL_POLICY: unanimity | majority | any_approve | weighted
    /// - COUNCIL_AGENT_TIMEOUT_MS
    /// - COUNCIL_MIN_CONFIDENCE
    /// - COUNCIL_CONTINUE_ON_AGENT_FAILURE, COUNCIL_FALLBACK_TO_SIMULATED,
    ///   COUNCIL_REJECT_HIGH_RISK: "1", "true", "yes", "on" => true
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(policy) = std::env::var("COUNCIL_POLICY")
            .ok()
            .and_then(|v| AggregationPolicy::parse(&v))
        {
            cfg.policy = policy;
        }
        if let Some(ms) = std::env::var("COUNCIL_AGENT_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            cfg.agent_timeout_ms = ms;
        }
        if let Some(threshold) = std::env::var("COUNCIL_MIN_CONFIDENCE")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        {
            cfg.min_confidence_threshold = threshold.clamp(0.0, 1.0);
        }
        if let Some(flag) = env_flag("COUNCIL_CONTINUE_ON_AGENT_FAILURE") {
            cfg.continue_on_agent_failure = flag;
        }
        if let Some(flag) = env_flag("COUNCIL_FALLBACK_TO_SIMULATED") {
            cfg.fallback_to_simulated = flag;
        }
        if let Some(flag) = env_flag("COUNCIL_REJECT_HIGH_RISK") {
            cfg.reject_high_risk = flag;
        }

        cfg
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, CouncilError> {
        serde_yaml_bw::from_str(text).map_err(|e| CouncilError::Config(e.to_string()))
    }

    pub async fn load(path: &Path) -> Result<Self, CouncilError> {
        let text = tokio::fs::read_to_string(path).await?;
        Self::from_yaml_str(&text)
    }

    /// Enabled roles in canonical order. An empty roster means every role.
    pub fn active_roles(&self) -> Vec<CouncilRole> {
        if self.roles.is_empty() {
            return CouncilRole::ALL.to_vec();
        }
        self.roles
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(role, _)| *role)
            .collect()
    }

    pub fn role_config(&self, role: CouncilRole) -> RoleConfig {
        self.roles
            .get(&role)
            .cloned()
            .unwrap_or_else(|| RoleConfig::for_role(role))
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_timeout_ms)
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
