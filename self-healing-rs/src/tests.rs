use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;
use tokio_test::assert_ok;

use governance_types::{ManualClock, PerformanceMetrics};
use proposal_apply::{ApplyEngineConfig, ProposalApplyEngine};

use crate::config::{SelfHealingConfig, CONFIG_FILE};
use crate::degradation::{score, Recommendation};
use crate::model::{ApplicationStatus, ProposalApplication, RollbackResult};
use crate::monitor::{SelfHealingMonitor, AUTO_HEAL_TRIGGER};
use crate::reverter::{ApplicationReverter, EngineReverter, RevertOutcome};
use crate::HealingError;

fn metrics(success_rate: f64, cost: f64, duration_ms: f64, tasks: u64) -> PerformanceMetrics {
    PerformanceMetrics::new(success_rate, cost, duration_ms, tasks)
}

fn baseline() -> PerformanceMetrics {
    metrics(0.9, 10.0, 1000.0, 100)
}

fn regressed() -> PerformanceMetrics {
    metrics(0.75, 10.0, 1000.0, 50)
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()
}

/// Restores every file except those listed in `failing`.
#[derive(Default)]
struct ScriptedReverter {
    failing: HashSet<String>,
    reverted: Mutex<Vec<String>>,
}

impl ScriptedReverter {
    fn failing(files: &[&str]) -> Self {
        Self {
            failing: files.iter().map(|f| f.to_string()).collect(),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ApplicationReverter for ScriptedReverter {
    async fn revert(&self, application: &ProposalApplication) -> RevertOutcome {
        self.reverted.lock().unwrap().push(application.id.clone());
        let mut outcome = RevertOutcome::default();
        for file in &application.changed_files {
            if self.failing.contains(file) {
                outcome.failed.push((file.clone(), "disk on fire".to_string()));
            } else {
                outcome.restored.push(file.clone());
            }
        }
        outcome
    }
}

struct Harness {
    dir: TempDir,
    clock: Arc<ManualClock>,
    reverter: Arc<ScriptedReverter>,
    monitor: SelfHealingMonitor,
}

impl Harness {
    async fn new(config_yaml: Option<&str>) -> Self {
        Self::with_reverter(config_yaml, ScriptedReverter::default()).await
    }

    async fn with_reverter(config_yaml: Option<&str>, reverter: ScriptedReverter) -> Self {
        let dir = tempfile::tempdir().unwrap();
        if let Some(yaml) = config_yaml {
            std::fs::write(dir.path().join(CONFIG_FILE), yaml).unwrap();
        }
        let clock = Arc::new(ManualClock::new(start()));
        let reverter = Arc::new(reverter);
        let monitor = SelfHealingMonitor::open_with_clock(dir.path(), reverter.clone(), clock.clone())
            .await
            .unwrap();
        Self {
            dir,
            clock,
            reverter,
            monitor,
        }
    }

    async fn degraded_application(&self, proposal_id: &str) -> String {
        let app = self
            .monitor
            .record_application(proposal_id, vec![format!("prompts/{proposal_id}.md")], baseline())
            .await
            .unwrap();
        self.monitor.update_metrics(&app.id, regressed()).await.unwrap();
        app.id
    }

    async fn status(&self, id: &str) -> ApplicationStatus {
        self.monitor.application(id).await.unwrap().status
    }
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

#[test]
fn fifteen_point_success_drop_recommends_rollback() {
    let result = score(&baseline(), &regressed(), &SelfHealingConfig::default());

    assert!(result.degraded);
    assert!((result.success_rate_drop - 15.0).abs() < 1e-9);
    assert_eq!(result.severity, 50.0);
    assert_eq!(result.recommendation, Recommendation::Rollback);
    assert_eq!(result.reasons.len(), 1);
}

#[test]
fn cost_and_duration_breaches_add_up() {
    let config = SelfHealingConfig::default();

    let cost_only = score(&baseline(), &metrics(0.9, 12.5, 1000.0, 50), &config);
    assert_eq!(cost_only.severity, 25.0);
    assert_eq!(cost_only.recommendation, Recommendation::Monitor);

    let both = score(&baseline(), &metrics(0.9, 12.5, 1400.0, 50), &config);
    assert_eq!(both.severity, 50.0);
    assert_eq!(both.recommendation, Recommendation::Rollback);

    let everything = score(&baseline(), &metrics(0.5, 30.0, 5000.0, 50), &config);
    assert_eq!(everything.severity, 100.0);
}

#[test]
fn improvements_and_zero_baselines_are_ignored() {
    let config = SelfHealingConfig::default();

    let better = score(&baseline(), &metrics(0.95, 8.0, 900.0, 50), &config);
    assert!(!better.degraded);
    assert_eq!(better.recommendation, Recommendation::Ignore);

    let free = metrics(0.9, 0.0, 0.0, 100);
    let result = score(&free, &metrics(0.9, 5.0, 300.0, 50), &config);
    assert_eq!(result.cost_increase_pct, None);
    assert_eq!(result.duration_increase_pct, None);
    assert_eq!(result.severity, 0.0);
}

// ─── Config and persistence ──────────────────────────────────────────────────

#[tokio::test]
async fn defaults_are_written_on_first_open() {
    let h = Harness::new(None).await;

    let text = std::fs::read_to_string(h.dir.path().join(CONFIG_FILE)).unwrap();
    let written = SelfHealingConfig::from_yaml_str(&text).unwrap();
    assert_eq!(written, SelfHealingConfig::default());
    assert_eq!(h.monitor.config().grace_period(), Duration::hours(6));
}

#[tokio::test]
async fn partial_config_keeps_other_defaults() {
    let h = Harness::new(Some("max_daily_rollbacks: 1\nmonitoring_window_hours: 8\n")).await;

    let config = h.monitor.config();
    assert_eq!(config.max_daily_rollbacks, 1);
    assert_eq!(config.monitoring_window_hours, 8);
    assert_eq!(config.min_task_count, 10);
    assert_eq!(config.grace_period(), Duration::hours(2));
}

#[tokio::test]
async fn state_survives_reopening() {
    let h = Harness::new(None).await;
    let id = h.degraded_application("p1").await;
    h.monitor.rollback(&id, "manual", false, "operator").await.unwrap();

    let reopened = SelfHealingMonitor::open_with_clock(
        h.dir.path(),
        Arc::new(ScriptedReverter::default()),
        h.clock.clone(),
    )
    .await
    .unwrap();

    let app = reopened.application(&id).await.unwrap();
    assert_eq!(app.status, ApplicationStatus::RolledBack);
    assert!(app.rolled_back);
    assert_eq!(reopened.rollback_log().await.len(), 1);
}

// ─── Evaluation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn evaluation_needs_enough_samples() {
    let h = Harness::new(None).await;
    let app = h
        .monitor
        .record_application("p1", vec!["a.md".to_string()], baseline())
        .await
        .unwrap();
    assert_eq!(app.status, ApplicationStatus::Monitoring);

    assert!(h.monitor.evaluate_application(&app.id).await.unwrap().is_none());

    h.monitor.update_metrics(&app.id, metrics(0.1, 10.0, 1000.0, 3)).await.unwrap();
    assert!(h.monitor.evaluate_application(&app.id).await.unwrap().is_none());

    h.monitor.update_metrics(&app.id, regressed()).await.unwrap();
    let result = h.monitor.evaluate_application(&app.id).await.unwrap().unwrap();
    assert_eq!(result.recommendation, Recommendation::Rollback);
    assert!(h.monitor.application(&app.id).await.unwrap().last_evaluation.is_some());

    assert!(matches!(
        h.monitor.evaluate_application("nope").await,
        Err(HealingError::NotFound(_))
    ));
}

// ─── Rollback ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn automatic_rollbacks_are_rate_limited_per_calendar_day() {
    let h = Harness::new(None).await;
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(h.degraded_application(&format!("p{n}")).await);
    }

    for id in &ids[..3] {
        let action = h.monitor.rollback(id, "regressed", true, AUTO_HEAL_TRIGGER).await.unwrap();
        assert!(action.automatic);
        assert_eq!(action.result, RollbackResult::Success);
    }

    let err = h.monitor.rollback(&ids[3], "regressed", true, AUTO_HEAL_TRIGGER).await.unwrap_err();
    match err {
        HealingError::RateLimited { max, date } => {
            assert_eq!(max, 3);
            assert_eq!(date, start().date_naive());
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(h.status(&ids[3]).await, ApplicationStatus::Monitoring);

    // Manual rollbacks are not subject to the quota.
    h.monitor.rollback(&ids[3], "operator decision", false, "operator").await.unwrap();

    h.clock.advance(Duration::days(1));
    h.monitor.rollback(&ids[4], "regressed", true, AUTO_HEAL_TRIGGER).await.unwrap();

    let stats = h.monitor.statistics().await;
    assert_eq!(stats.automatic_rollbacks_today, 1);
    assert_eq!(stats.remaining_automatic_rollbacks_today, 2);
    assert_eq!(stats.rolled_back, 5);
}

#[tokio::test]
async fn rollback_results_reflect_what_was_restored() {
    let h = Harness::with_reverter(None, ScriptedReverter::failing(&["b.md", "c.md"])).await;

    let partial = h
        .monitor
        .record_application("p1", vec!["a.md".to_string(), "b.md".to_string()], baseline())
        .await
        .unwrap();
    let action = h.monitor.rollback(&partial.id, "test", false, "operator").await.unwrap();
    assert_eq!(action.result, RollbackResult::Partial);
    assert_eq!(action.restored_files, vec!["a.md"]);
    assert!(action.error.as_deref().unwrap().contains("b.md"));
    assert_eq!(h.status(&partial.id).await, ApplicationStatus::RolledBack);

    let failed = h
        .monitor
        .record_application("p2", vec!["c.md".to_string()], baseline())
        .await
        .unwrap();
    let action = h.monitor.rollback(&failed.id, "test", false, "operator").await.unwrap();
    assert_eq!(action.result, RollbackResult::Failed);
    let app = h.monitor.application(&failed.id).await.unwrap();
    assert_eq!(app.status, ApplicationStatus::NeedsReview);
    assert!(!app.rolled_back);
}

#[tokio::test]
async fn rolled_back_applications_stay_rolled_back() {
    let h = Harness::new(None).await;
    let id = h.degraded_application("p1").await;

    h.monitor.rollback(&id, "first", false, "operator").await.unwrap();
    assert!(matches!(
        h.monitor.rollback(&id, "second", false, "operator").await,
        Err(HealingError::AlreadyRolledBack(_))
    ));
    assert!(matches!(
        h.monitor.rollback("missing", "x", false, "operator").await,
        Err(HealingError::NotFound(_))
    ));
    assert_eq!(h.reverter.reverted.lock().unwrap().len(), 1);
}

// ─── Sweep ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn sweep_waits_for_the_grace_period() {
    let h = Harness::new(None).await;
    let id = h.degraded_application("p1").await;

    h.clock.advance(Duration::hours(1));
    assert!(h.monitor.run_auto_heal().await.unwrap().is_empty());
    assert_eq!(h.status(&id).await, ApplicationStatus::Monitoring);

    h.clock.advance(Duration::hours(6));
    let actions = h.monitor.run_auto_heal().await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].application_id, id);
    assert_eq!(actions[0].triggered_by, AUTO_HEAL_TRIGGER);
    assert!(actions[0].reason.contains("success rate dropped"));
    assert_eq!(h.status(&id).await, ApplicationStatus::RolledBack);
}

#[tokio::test]
async fn sweep_swallows_rate_limits_and_retries_next_day() {
    let h = Harness::new(Some("max_daily_rollbacks: 1\n")).await;
    let first = h.degraded_application("p1").await;
    let second = h.degraded_application("p2").await;

    h.clock.advance(Duration::hours(7));
    let actions = h.monitor.run_auto_heal().await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].application_id, first);
    assert_eq!(h.status(&second).await, ApplicationStatus::Monitoring);

    h.clock.advance(Duration::days(1));
    let actions = h.monitor.run_auto_heal().await.unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].application_id, second);
}

#[tokio::test]
async fn window_end_settles_remaining_applications() {
    let h = Harness::new(None).await;

    let healthy = h
        .monitor
        .record_application("ok", vec!["a.md".to_string()], baseline())
        .await
        .unwrap();
    h.monitor.update_metrics(&healthy.id, metrics(0.92, 9.0, 950.0, 40)).await.unwrap();

    let pricier = h
        .monitor
        .record_application("cost", vec!["b.md".to_string()], baseline())
        .await
        .unwrap();
    h.monitor.update_metrics(&pricier.id, metrics(0.9, 13.0, 1000.0, 40)).await.unwrap();

    h.clock.advance(Duration::hours(12));
    h.monitor.run_auto_heal().await.unwrap();
    assert_eq!(h.status(&healthy.id).await, ApplicationStatus::Monitoring);
    assert_eq!(h.status(&pricier.id).await, ApplicationStatus::Monitoring);

    h.clock.advance(Duration::hours(12));
    assert!(h.monitor.run_auto_heal().await.unwrap().is_empty());
    assert_eq!(h.status(&healthy.id).await, ApplicationStatus::Effective);
    assert_eq!(h.status(&pricier.id).await, ApplicationStatus::NeedsReview);

    let stats = h.monitor.statistics().await;
    assert_eq!((stats.effective, stats.needs_review, stats.monitoring), (1, 1, 0));
}

#[tokio::test]
async fn disabled_auto_rollback_marks_degraded() {
    let h = Harness::new(Some("auto_rollback_enabled: false\n")).await;
    let id = h.degraded_application("p1").await;

    h.clock.advance(Duration::hours(7));
    assert!(h.monitor.run_auto_heal().await.unwrap().is_empty());
    assert_eq!(h.status(&id).await, ApplicationStatus::Degraded);
    assert!(h.reverter.reverted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn disabled_monitor_never_sweeps() {
    let h = Harness::new(Some("enabled: false\n")).await;
    let id = h.degraded_application("p1").await;

    h.clock.advance(Duration::days(2));
    assert!(h.monitor.run_auto_heal().await.unwrap().is_empty());
    assert_eq!(h.status(&id).await, ApplicationStatus::Monitoring);
}

// ─── Engine bridge ───────────────────────────────────────────────────────────

fn write(base: &Path, rel: &str, content: &str) {
    let path = base.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

#[tokio::test]
async fn engine_reverter_restores_applied_files() {
    let project = tempfile::tempdir().unwrap();
    let root = project.path();
    write(root, "prompts/system.md", "Retry immediately.\n");
    write(root, ".governance/policy.yaml", "automation_level: 1\nauto_apply_patterns: [\"prompts/*.md\"]\n");
    write(
        root,
        "proposals/p1/change.diff",
        "--- a/prompts/system.md\n+++ b/prompts/system.md\n@@ -1 +1 @@\n-Retry immediately.\n+Retry with backoff.\n",
    );

    let engine = Arc::new(ProposalApplyEngine::new(ApplyEngineConfig::for_project(root)));
    let parsed = engine.parse_proposal(Path::new("proposals/p1")).await.unwrap();
    let outcome = engine.apply_proposal(&parsed).await.unwrap();
    assert!(outcome.applied, "{:?}", outcome.errors);
    let record = engine
        .load_record(outcome.applied_record_id.as_deref().unwrap())
        .await
        .unwrap();

    let monitor = SelfHealingMonitor::open(
        root.join(".governance/self-healing"),
        Arc::new(EngineReverter::new(engine.clone())),
    )
    .await
    .unwrap();
    let app = monitor.record_applied_record("prop-1", &record, baseline()).await.unwrap();
    assert_eq!(app.applied_record_id.as_deref(), Some(record.id.as_str()));
    assert_eq!(app.backup_paths.len(), 1);

    let action = monitor.rollback(&app.id, "regressed", false, "operator").await.unwrap();
    assert_eq!(action.result, RollbackResult::Success);
    assert_eq!(action.restored_files, vec!["prompts/system.md"]);
    assert_eq!(
        std::fs::read_to_string(root.join("prompts/system.md")).unwrap(),
        "Retry immediately.\n"
    );
    assert!(engine.is_rolled_back(&record.id).await.unwrap());
}

#[tokio::test]
async fn recorded_application_reverts_to_its_snapshot() {
    let project = tempfile::tempdir().unwrap();
    let root = project.path();
    write(root, "prompts/system.md", "Retry immediately.\n");

    let engine = Arc::new(ProposalApplyEngine::new(ApplyEngineConfig::for_project(root)));
    let monitor = SelfHealingMonitor::open(
        root.join(".governance/self-healing"),
        Arc::new(EngineReverter::new(engine)),
    )
    .await
    .unwrap();

    let app = monitor
        .record_application(
            "prop-2",
            vec!["prompts/system.md".to_string(), "notes/new.md".to_string()],
            baseline(),
        )
        .await
        .unwrap();
    assert_eq!(app.backup_paths.len(), 1);
    assert_eq!(app.created_files, vec!["notes/new.md"]);

    write(root, "prompts/system.md", "Retry with backoff.\n");
    write(root, "notes/new.md", "added\n");

    let action = assert_ok!(monitor.rollback(&app.id, "regressed", false, "operator").await);
    assert_eq!(action.result, RollbackResult::Success, "{:?}", action.error);
    let mut restored = action.restored_files.clone();
    restored.sort();
    assert_eq!(restored, vec!["notes/new.md", "prompts/system.md"]);

    assert_eq!(
        std::fs::read_to_string(root.join("prompts/system.md")).unwrap(),
        "Retry immediately.\n"
    );
    assert!(!root.join("notes/new.md").exists());
    assert_eq!(
        monitor.application(&app.id).await.unwrap().status,
        ApplicationStatus::RolledBack
    );
}
