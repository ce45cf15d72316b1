use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;
use tokio_test::assert_ok;

use governance_types::ManualClock;

use crate::engine::{ApplyEngineConfig, ProposalApplyEngine};
use crate::parser::ChangeKind;
use crate::policy::SitePolicy;
use crate::record::{EVENT_APPLIED, EVENT_ROLLED_BACK};
use crate::ApplyError;

const PROMPT: &str = "Be concise.\nRetry immediately.\n";
const LEGACY: &str = "old rule\n";

const MODIFY_PROMPT: &str = "\
--- a/prompts/system.md
+++ b/prompts/system.md
@@ -1,2 +1,2 @@
 Be concise.
-Retry immediately.
+Retry with backoff.
";

const CREATE_RULE: &str = "\
--- /dev/null
+++ b/rules/backoff.md
@@ -0,0 +1 @@
+Always back off.
";

const DELETE_LEGACY: &str = "\
--- a/rules/legacy.md
+++ /dev/null
@@ -1 +0,0 @@
-old rule
";

const BROKEN_LEGACY: &str = "\
--- a/rules/legacy.md
+++ b/rules/legacy.md
@@ -1 +1 @@
-a rule that is not there
+replacement
";

const POLICY: &str = "\
automation_level: 1
auto_apply_patterns:
  - \"prompts/*.md\"
  - \"rules/*.md\"
auto_apply_exclusions: []
";

struct Fixture {
    dir: TempDir,
    engine: ProposalApplyEngine,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        write(dir.path(), "prompts/system.md", PROMPT);
        write(dir.path(), "rules/legacy.md", LEGACY);
        write(dir.path(), ".governance/policy.yaml", POLICY);

        let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let engine = ProposalApplyEngine::new(ApplyEngineConfig::for_project(dir.path()))
            .with_clock(Arc::new(clock));
        Self { dir, engine }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn read(&self, rel: &str) -> Option<String> {
        std::fs::read_to_string(self.root().join(rel)).ok()
    }

    fn proposal(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.root().join("proposals").join(name);
        for (file, content) in files {
            write(&dir, file, content);
        }
        dir
    }

    fn set_policy(&self, yaml: &str) {
        write(self.root(), ".governance/policy.yaml", yaml);
    }

    fn applied_json_count(&self) -> usize {
        std::fs::read_dir(self.root().join(".governance/applied"))
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
                    .count()
            })
            .unwrap_or(0)
    }
}

fn write(base: &Path, rel: &str, content: &str) {
    let path = base.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn apply_then_rollback_restores_every_file() {
    let fx = Fixture::new();
    let rules = format!("{CREATE_RULE}{DELETE_LEGACY}");
    let dir = fx.proposal(
        "p1",
        &[
            ("01-prompt.diff", MODIFY_PROMPT),
            ("02-rules.patch", rules.as_str()),
            ("proposal.json", r#"{"id": "prop-7", "title": "Backoff", "risk": "low"}"#),
        ],
    );

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    assert_eq!(parsed.changes.len(), 3);
    assert_eq!(parsed.proposal_id(), Some("prop-7"));

    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();
    assert!(outcome.applied, "errors: {:?}", outcome.errors);
    let record_id = outcome.applied_record_id.clone().unwrap();
    assert!(record_id.starts_with("20260301T120000-"));
    assert_eq!(record_id.len(), "20260301T120000-".len() + 8);
    assert_eq!(
        outcome.changed_files,
        vec!["prompts/system.md", "rules/backoff.md", "rules/legacy.md"]
    );

    assert_eq!(fx.read("prompts/system.md").unwrap(), "Be concise.\nRetry with backoff.\n");
    assert_eq!(fx.read("rules/backoff.md").unwrap(), "Always back off.\n");
    assert_eq!(fx.read("rules/legacy.md"), None);

    let record = fx.engine.load_record(&record_id).await.unwrap();
    assert_eq!(record.proposal_id.as_deref(), Some("prop-7"));
    assert_eq!(record.proposal_dir_rel, "proposals/p1");
    assert!(fx.root().join(format!(".governance/applied/{record_id}.md")).exists());

    let report = fx.engine.rollback_proposal(&record_id).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.removed, vec!["rules/backoff.md"]);

    assert_eq!(fx.read("prompts/system.md").unwrap(), PROMPT);
    assert_eq!(fx.read("rules/legacy.md").unwrap(), LEGACY);
    assert_eq!(fx.read("rules/backoff.md"), None);

    let events: Vec<_> = fx
        .engine
        .read_audit_log()
        .await
        .unwrap()
        .into_iter()
        .map(|e| (e.event, e.record_id))
        .collect();
    assert_eq!(
        events,
        vec![
            (EVENT_APPLIED.to_string(), record_id.clone()),
            (EVENT_ROLLED_BACK.to_string(), record_id.clone()),
        ]
    );

    let again = fx.engine.rollback_proposal(&record_id).await.unwrap_err();
    assert!(matches!(again, ApplyError::AlreadyRolledBack(id) if id == record_id));
}

#[tokio::test]
async fn failing_patch_leaves_tree_untouched_and_writes_no_record() {
    let fx = Fixture::new();
    let dir = fx.proposal(
        "p2",
        &[
            ("01-prompt.diff", MODIFY_PROMPT),
            ("02-create.diff", CREATE_RULE),
            ("03-broken.diff", BROKEN_LEGACY),
        ],
    );

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();

    assert!(!outcome.applied);
    assert!(outcome.applied_record_id.is_none());
    assert!(outcome.errors[0].contains("rules/legacy.md"), "{:?}", outcome.errors);

    assert_eq!(fx.read("prompts/system.md").unwrap(), PROMPT);
    assert_eq!(fx.read("rules/legacy.md").unwrap(), LEGACY);
    assert_eq!(fx.read("rules/backoff.md"), None);
    assert_eq!(fx.applied_json_count(), 0);
    assert!(fx.engine.read_audit_log().await.unwrap().is_empty());
    assert!(fx.engine.list_applied_records().await.unwrap().is_empty());
}

const SECOND_PROMPT_EDIT: &str = "\
--- a/prompts/system.md
+++ b/prompts/system.md
@@ -1,2 +1,2 @@
-Be concise.
+Be brief.
 Retry with backoff.
";

const BROKEN_PROMPT_EDIT: &str = "\
--- a/prompts/system.md
+++ b/prompts/system.md
@@ -1 +1 @@
-a line that is not there
+replacement
";

#[tokio::test]
async fn failure_after_second_edit_of_a_file_restores_its_original() {
    let fx = Fixture::new();
    let dir = fx.proposal(
        "twice-broken",
        &[("01-prompt.diff", MODIFY_PROMPT), ("02-prompt.diff", BROKEN_PROMPT_EDIT)],
    );

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();

    assert!(!outcome.applied);
    assert_eq!(fx.read("prompts/system.md").unwrap(), PROMPT);
    assert_eq!(fx.applied_json_count(), 0);
}

#[tokio::test]
async fn rollback_after_two_edits_of_a_file_restores_its_original() {
    let fx = Fixture::new();
    let dir = fx.proposal(
        "twice",
        &[("01-prompt.diff", MODIFY_PROMPT), ("02-prompt.diff", SECOND_PROMPT_EDIT)],
    );

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();
    assert!(outcome.applied, "errors: {:?}", outcome.errors);
    assert_eq!(outcome.changed_files, vec!["prompts/system.md"]);
    assert_eq!(fx.read("prompts/system.md").unwrap(), "Be brief.\nRetry with backoff.\n");

    let record_id = outcome.applied_record_id.unwrap();
    let record = fx.engine.load_record(&record_id).await.unwrap();
    assert_eq!(record.backup_files.len(), 1);

    assert_ok!(fx.engine.rollback_proposal(&record_id).await);
    assert_eq!(fx.read("prompts/system.md").unwrap(), PROMPT);
}

#[tokio::test]
async fn rolling_back_a_created_file_prunes_new_directories() {
    let fx = Fixture::new();
    fx.set_policy(
        "automation_level: 1\nauto_apply_patterns:\n  - \"rules/**/*.md\"\nauto_apply_exclusions: []\n",
    );
    let create = "\
--- /dev/null
+++ b/rules/drafts/deep/new.md
@@ -0,0 +1 @@
+draft
";
    let dir = fx.proposal("nested", &[("01-create.diff", create)]);

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();
    assert!(outcome.applied, "errors: {:?}", outcome.errors);
    assert_eq!(fx.read("rules/drafts/deep/new.md").unwrap(), "draft\n");

    let report = assert_ok!(
        fx.engine
            .rollback_proposal(&outcome.applied_record_id.unwrap())
            .await
    );
    assert_eq!(report.removed, vec!["rules/drafts/deep/new.md"]);

    assert!(!fx.root().join("rules/drafts").exists());
    assert_eq!(fx.read("rules/legacy.md").unwrap(), LEGACY);
}

#[tokio::test]
async fn exclusions_flip_approval_eligibility_at_every_level() {
    let fx = Fixture::new();
    let dir = fx.proposal("p3", &[("change.diff", MODIFY_PROMPT)]);
    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();

    for level in [0u8, 1, 2] {
        fx.set_policy(&format!(
            "automation_level: {level}\nauto_apply_patterns: [\"prompts/*.md\"]\n"
        ));
        assert!(fx.engine.can_apply_with_approval(&parsed).await, "level {level}");
        assert_eq!(fx.engine.can_auto_apply(&parsed).await, level >= 1, "level {level}");

        fx.set_policy(&format!(
            "automation_level: {level}\nauto_apply_patterns: [\"prompts/*.md\"]\nauto_apply_exclusions: [\"prompts/system.md\"]\n"
        ));
        assert!(!fx.engine.can_apply_with_approval(&parsed).await, "level {level}");
        assert!(!fx.engine.can_auto_apply(&parsed).await, "level {level}");
    }
}

#[tokio::test]
async fn missing_or_invalid_policy_denies_everything() {
    let fx = Fixture::new();
    let dir = fx.proposal("p4", &[("change.diff", MODIFY_PROMPT)]);
    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();

    std::fs::remove_file(fx.root().join(".governance/policy.yaml")).unwrap();
    assert!(!fx.engine.can_apply_with_approval(&parsed).await);

    fx.set_policy("automation_level: [not a number\n");
    assert!(!fx.engine.can_apply_with_approval(&parsed).await);

    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();
    assert!(!outcome.applied);
    assert_eq!(fx.read("prompts/system.md").unwrap(), PROMPT);
}

#[test]
fn governance_files_always_need_a_human() {
    let policy = SitePolicy::from_yaml_str(
        "automation_level: 2\nauto_apply_patterns: [\".governance/*.yaml\", \"prompts/*.md\"]\n",
    )
    .unwrap();

    assert!(policy.requires_human_approval(".governance/policy.yaml"));
    assert!(!policy.requires_human_approval("prompts/system.md"));
    assert!(policy.is_path_allowed("prompts/system.md"));
    assert!(!policy.is_path_allowed("prompts/nested/deep.md"));
}

#[test]
fn invalid_exclusion_glob_fails_closed() {
    let policy = SitePolicy::from_yaml_str(
        "auto_apply_patterns: [\"prompts/*.md\", \"rules/[\"]\nauto_apply_exclusions: [\"[\"]\n",
    )
    .unwrap();
    assert!(!policy.is_path_allowed("prompts/system.md"));

    let policy = SitePolicy::from_yaml_str("auto_apply_patterns: [\"rules/[\"]\n").unwrap();
    assert!(!policy.is_path_allowed("rules/[x"));
}

#[tokio::test]
async fn governance_change_is_ineligible_even_when_globbed() {
    let fx = Fixture::new();
    fx.set_policy("automation_level: 2\nauto_apply_patterns: [\".governance/*.yaml\"]\n");
    let diff = "--- a/.governance/policy.yaml\n+++ b/.governance/policy.yaml\n@@ -1 +1 @@\n-automation_level: 2\n+automation_level: 2 \n";
    let dir = fx.proposal("p5", &[("gov.diff", diff)]);
    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();

    let policy = fx.engine.load_policy().await;
    let eligibility = policy.check(&parsed);
    assert!(!eligibility.eligible);
    assert!(eligibility.reasons[0].contains("requires human approval"));
}

#[tokio::test]
async fn declared_changes_without_diffs_are_never_applicable() {
    let fx = Fixture::new();
    let dir = fx.proposal(
        "p6",
        &[
            ("change.diff", MODIFY_PROMPT),
            (
                "proposal-meta.json",
                r#"{"proposalId": "prop-9", "changes": [
                    {"path": "prompts/system.md", "kind": "modify"},
                    {"path": "rules/extra.md", "type": "create"}
                ]}"#,
            ),
        ],
    );

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    assert_eq!(parsed.proposal_id(), Some("prop-9"));
    assert_eq!(parsed.changes.len(), 2);
    let extra = &parsed.changes[1];
    assert_eq!(extra.path, "rules/extra.md");
    assert_eq!(extra.kind, ChangeKind::Create);
    assert!(extra.patch.is_none());

    assert!(!fx.engine.can_apply_with_approval(&parsed).await);
    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();
    assert!(!outcome.applied);
    assert!(outcome.errors.iter().any(|e| e.contains("no patch text")));
    assert_eq!(fx.read("prompts/system.md").unwrap(), PROMPT);
}

#[tokio::test]
async fn empty_proposal_is_not_eligible() {
    let fx = Fixture::new();
    let dir = fx.root().join("proposals/empty");
    std::fs::create_dir_all(&dir).unwrap();

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    assert!(parsed.changes.is_empty());
    assert!(!fx.engine.can_apply_with_approval(&parsed).await);
}

#[tokio::test]
async fn parent_directory_paths_are_refused() {
    let fx = Fixture::new();
    fx.set_policy("automation_level: 2\nauto_apply_patterns: [\"**\"]\n");
    let diff = "--- /dev/null\n+++ b/../escape.txt\n@@ -0,0 +1 @@\n+pwned\n";
    let dir = fx.proposal("p7", &[("escape.diff", diff)]);

    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();

    assert!(!outcome.applied);
    assert!(!fx.root().parent().unwrap().join("escape.txt").exists());
}

#[cfg(unix)]
#[tokio::test]
async fn symlinked_directories_cannot_escape_the_root() {
    let fx = Fixture::new();
    let outside = tempfile::tempdir().unwrap();
    write(outside.path(), "system.md", PROMPT);

    std::fs::remove_dir_all(fx.root().join("prompts")).unwrap();
    std::os::unix::fs::symlink(outside.path(), fx.root().join("prompts")).unwrap();

    let dir = fx.proposal("p8", &[("change.diff", MODIFY_PROMPT)]);
    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    let outcome = fx.engine.apply_proposal(&parsed).await.unwrap();

    assert!(!outcome.applied);
    assert!(outcome.errors[0].contains("outside the project root"), "{:?}", outcome.errors);
    assert_eq!(std::fs::read_to_string(outside.path().join("system.md")).unwrap(), PROMPT);
}

#[tokio::test]
async fn missing_backup_is_reported_after_restoring_the_rest() {
    let fx = Fixture::new();
    let dir = fx.proposal(
        "p9",
        &[("01-prompt.diff", MODIFY_PROMPT), ("02-create.diff", CREATE_RULE)],
    );
    let parsed = fx.engine.parse_proposal(&dir).await.unwrap();
    let record_id = fx
        .engine
        .apply_proposal(&parsed)
        .await
        .unwrap()
        .applied_record_id
        .unwrap();

    std::fs::remove_file(
        fx.root()
            .join(".governance/applied/backups")
            .join(&record_id)
            .join("prompts/system.md"),
    )
    .unwrap();

    let err = fx.engine.rollback_proposal(&record_id).await.unwrap_err();
    match err {
        ApplyError::MissingBackup { path, report, .. } => {
            assert_eq!(path, "prompts/system.md");
            assert_eq!(report.removed, vec!["rules/backoff.md"]);
            assert_eq!(report.failures.len(), 1);
        }
        other => panic!("expected MissingBackup, got {other:?}"),
    }
    assert_eq!(fx.read("rules/backoff.md"), None);

    let last = fx.engine.read_audit_log().await.unwrap().pop().unwrap();
    assert_eq!(last.event, EVENT_ROLLED_BACK);
    assert!(!last.complete);
    assert!(!fx.engine.is_rolled_back(&record_id).await.unwrap());
}

#[tokio::test]
async fn record_lookup_errors() {
    let fx = Fixture::new();

    assert!(matches!(
        fx.engine.rollback_proposal("20260101T000000-deadbeef").await,
        Err(ApplyError::RecordNotFound(_))
    ));
    assert!(matches!(
        fx.engine.rollback_proposal("../../etc/passwd").await,
        Err(ApplyError::InvalidRecord { .. })
    ));

    write(fx.root(), ".governance/applied/20260101T000000-00000000.json", "{not json");
    assert!(matches!(
        fx.engine.load_record("20260101T000000-00000000").await,
        Err(ApplyError::InvalidRecord { .. })
    ));
    assert!(fx.engine.list_applied_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn malformed_diff_is_a_parse_error() {
    let fx = Fixture::new();
    let dir = fx.proposal("p10", &[("bad.diff", "--- a/x\n+++ b/x\n@@ nonsense @@\n")]);

    let err = fx.engine.parse_proposal(&dir).await.unwrap_err();
    assert!(matches!(err, ApplyError::Parse { ref file, .. } if file.ends_with("bad.diff")));
}
