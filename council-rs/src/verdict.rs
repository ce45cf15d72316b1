// council-rs/src/verdict.rs
// Extraction of structured verdicts from free-form agent output.

use serde::Deserialize;

use governance_types::{CouncilRole, VoteKind};

use crate::CouncilError;

/// Confidence assumed when an agent omits it.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Parsed reviewer verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentVerdict {
    pub vote: VoteKind,
    pub confidence: f64,
    pub reasoning: String,
    pub suggestions: Vec<String>,
    pub issues: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    vote: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "reason", alias = "rationale")]
    reasoning: Option<String>,
    #[serde(default)]
    suggestions: Vec<String>,
    #[serde(default)]
    issues: Vec<String>,
}

/// Parse the JSON verdict out of an agent's reply. Accepts a fenced
/// ```json block or the outermost `{...}` span.
pub fn parse_verdict(role: CouncilRole, output: &str) -> Result<AgentVerdict, CouncilError> {
    let malformed = |message: String| CouncilError::MalformedVerdict { role, message };

    let json = extract_json(output).ok_or_else(|| malformed("no JSON object in reply".to_string()))?;
    let raw: RawVerdict = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;

    let vote = VoteKind::parse_lenient(&raw.vote)
        .ok_or_else(|| malformed(format!("unknown vote '{}'", raw.vote)))?;

    let confidence = match raw.confidence {
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        Some(_) => 0.0,
        None => DEFAULT_CONFIDENCE,
    };

    Ok(AgentVerdict {
        vote,
        confidence,
        reasoning: raw.reasoning.unwrap_or_default(),
        suggestions: raw.suggestions,
        issues: raw.issues,
    })
}

fn extract_json(output: &str) -> Option<&str> {
    if let Some(start) = output.find("```json") {
        let body = &output[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            let candidate = body[..end].trim();
            if candidate.starts_with('{') {
                return Some(candidate);
            }
        }
    }

    let start = output.find('{')?;
    let end = output.rfind('}')?;
    (end > start).then(|| &output[start..=end])
}
