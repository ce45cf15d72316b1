// proposal-apply-rs/src/policy.rs
// Site policy and the two-tier eligibility gate.
//
// `can_apply_with_approval` ignores the automation level: a human has
// already approved. `can_auto_apply` additionally needs the level to allow
// unattended low-risk application.

use std::path::{Component, Path};

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::parser::ParsedProposal;
use crate::{ApplyError, Result};

/// Lowest automation level that permits unattended application.
pub const AUTO_APPLY_LOW_RISK: u8 = 1;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SitePolicy {
    pub automation_level: u8,
    pub auto_apply_patterns: Vec<String>,
    pub auto_apply_exclusions: Vec<String>,
    /// Paths that always need a human, regardless of the globs above.
    pub human_approval_paths: Vec<String>,
}

impl Default for SitePolicy {
    fn default() -> Self {
        Self {
            automation_level: 0,
            auto_apply_patterns: Vec::new(),
            auto_apply_exclusions: Vec::new(),
            human_approval_paths: vec![".governance/**".to_string()],
        }
    }
}

/// Eligibility verdict with one reason per blocked change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eligibility {
    pub eligible: bool,
    pub reasons: Vec<String>,
}

impl SitePolicy {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml_bw::from_str(text).map_err(|e| ApplyError::Parse {
            file: "site policy".to_string(),
            message: e.to_string(),
        })
    }

    /// Read the policy from disk. A missing or unparsable document yields
    /// the default-deny policy.
    pub async fn load(path: &Path) -> Self {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "site policy unreadable; denying all");
                return Self::default();
            }
        };
        match Self::from_yaml_str(&text) {
            Ok(policy) => policy,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "site policy invalid; denying all");
                Self::default()
            }
        }
    }

    pub fn requires_human_approval(&self, path: &str) -> bool {
        self.human_approval_paths.iter().any(|p| deny_glob_matches(p, path))
    }

    /// Allowed by at least one pattern and by no exclusion.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        let excluded = self.auto_apply_exclusions.iter().any(|p| deny_glob_matches(p, path));
        !excluded && self.auto_apply_patterns.iter().any(|p| allow_glob_matches(p, path))
    }

    pub fn check(&self, parsed: &ParsedProposal) -> Eligibility {
        let mut reasons = Vec::new();
        if parsed.changes.is_empty() {
            reasons.push("proposal declares no changes".to_string());
        }

        for change in &parsed.changes {
            let Some(path) = normalize(&change.path) else {
                reasons.push(format!("{}: path is not a plain relative path", change.path));
                continue;
            };
            if self.requires_human_approval(&path) {
                reasons.push(format!("{path}: requires human approval"));
            } else if !self.is_path_allowed(&path) {
                reasons.push(format!("{path}: not covered by the auto-apply patterns"));
            }
            if change.patch.is_none() {
                reasons.push(format!("{path}: no patch text"));
            }
        }

        Eligibility {
            eligible: reasons.is_empty(),
            reasons,
        }
    }

    pub fn is_eligible_to_apply(&self, parsed: &ParsedProposal) -> bool {
        self.check(parsed).eligible
    }

    pub fn can_apply_with_approval(&self, parsed: &ParsedProposal) -> bool {
        self.is_eligible_to_apply(parsed)
    }

    pub fn can_auto_apply(&self, parsed: &ParsedProposal) -> bool {
        self.automation_level >= AUTO_APPLY_LOW_RISK && self.is_eligible_to_apply(parsed)
    }
}

fn allow_glob_matches(pattern: &str, path: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(path, MATCH_OPTIONS),
        Err(err) => {
            warn!(pattern, error = %err, "invalid allow glob ignored");
            false
        }
    }
}

/// Invalid deny globs match everything.
fn deny_glob_matches(pattern: &str, path: &str) -> bool {
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(path, MATCH_OPTIONS),
        Err(err) => {
            warn!(pattern, error = %err, "invalid deny glob treated as matching");
            true
        }
    }
}

/// Forward-slash relative form with `.` segments removed. `None` for
/// absolute paths and any `..` segment.
pub(crate) fn normalize(path: &str) -> Option<String> {
    let unified = path.replace('\\', "/");
    let mut parts = Vec::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
