// council-rs/src/prompts.rs
// Role prompt templates for delegated reviewers.

use std::path::Path;

use tracing::warn;

use governance_types::{CouncilRole, Proposal};

/// Reply contract appended to every built-in template.
pub const RESPONSE_FORMAT: &str = r#"Respond with a single JSON object and nothing else:
```json
{
  "vote": "approve | reject | abstain | request_changes",
  "confidence": 0.0,
  "reasoning": "why",
  "suggestions": ["optional concrete change"],
  "issues": ["optional problem found"]
}
```"#;

const PROPOSAL_BLOCK: &str = "Proposal {{id}} ({{type}}, risk: {{risk}})
Title: {{title}}
Source signal: {{source_signal}}

Description:
{{description}}

Payload:
{{payload}}";

/// Built-in template for a role.
pub fn builtin_template(role: CouncilRole) -> String {
    let charge = match role {
        CouncilRole::Analyst => {
            "You are the analyst on a change-review council. Judge whether the proposal \
             is grounded in the observed evidence and whether it addresses the underlying \
             pattern rather than a single incident."
        }
        CouncilRole::Reviewer => {
            "You are the reviewer on a change-review council. Judge whether the proposal is \
             complete, specific and understandable enough to apply and later audit."
        }
        CouncilRole::Security => {
            "You are the security reviewer on a change-review council. Judge the blast radius \
             of the change, whether it widens permissions or touches sensitive files, and \
             whether it can be reverted cleanly."
        }
        CouncilRole::Ethics => {
            "You are the ethics reviewer on a change-review council. Judge whether the change \
             weakens any safeguard, review step or rollback path, or shifts behavior in a way \
             users would not expect."
        }
    };
    format!("{charge}\n\n{PROPOSAL_BLOCK}\n\n{{{{response_format}}}}")
}

/// Load a role's template: the configured file when readable, otherwise the
/// built-in one.
pub async fn load_template(role: CouncilRole, prompt_path: Option<&Path>) -> String {
    if let Some(path) = prompt_path {
        match tokio::fs::read_to_string(path).await {
            Ok(text) if !text.trim().is_empty() => return text,
            Ok(_) => warn!(%role, path = %path.display(), "prompt template is empty; using built-in"),
            Err(err) => {
                warn!(%role, path = %path.display(), error = %err, "prompt template unreadable; using built-in")
            }
        }
    }
    builtin_template(role)
}

/// Substitute proposal fields into a template.
pub fn render(template: &str, proposal: &Proposal) -> String {
    let payload = serde_json::to_string_pretty(&proposal.payload).unwrap_or_else(|_| "{}".to_string());
    template
        .replace("{{id}}", &proposal.id)
        .replace("{{title}}", &proposal.title)
        .replace("{{description}}", &proposal.description)
        .replace("{{risk}}", proposal.risk.as_str())
        .replace("{{type}}", proposal.proposal_type.as_str())
        .replace("{{payload}}", &payload)
        .replace(
            "{{source_signal}}",
            proposal.source_signal_id.as_deref().unwrap_or("none"),
        )
        .replace("{{response_format}}", RESPONSE_FORMAT)
}
