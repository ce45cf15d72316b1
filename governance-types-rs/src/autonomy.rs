// governance-types-rs/src/autonomy.rs
// Autonomy knob controlling how much of the pipeline runs unattended.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::proposal::Risk;
use crate::GovernanceTypesError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AutonomyLevel {
    /// Nothing is applied without a human.
    #[default]
    Manual = 0,
    /// Low-risk proposals are applied automatically.
    LowRisk = 1,
    /// Every proposal is applied automatically.
    Full = 2,
}

impl AutonomyLevel {
    pub fn allows_auto_apply(self, risk: Risk) -> bool {
        match self {
            AutonomyLevel::Manual => false,
            AutonomyLevel::LowRisk => risk == Risk::Low,
            AutonomyLevel::Full => true,
        }
    }
}

impl TryFrom<u8> for AutonomyLevel {
    type Error = GovernanceTypesError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AutonomyLevel::Manual),
            1 => Ok(AutonomyLevel::LowRisk),
            2 => Ok(AutonomyLevel::Full),
            other => Err(GovernanceTypesError::InvalidAutonomyLevel(other)),
        }
    }
}

impl From<AutonomyLevel> for u8 {
    fn from(level: AutonomyLevel) -> Self {
        level as u8
    }
}

impl fmt::Display for AutonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}
