// governance-loop-rs/src/main.rs
// governance-daemon: operator CLI over the apply engine and self-healing monitor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;

use governance_loop::applier::MANUAL_TRIGGER;
use governance_loop::{
    init_logging, ApplyMode, DirectoryProposalApplier, EventBus, GovernancePaths, JsonFileProposalStore,
    LoggingConfig, MetricsSource, ProposalStore, Scheduler, TaskLogMetricsSource,
};
use governance_types::ProposalStatus;
use proposal_apply::ProposalApplyEngine;
use self_healing::{EngineReverter, RollbackResult, SelfHealingMonitor};

#[derive(Parser)]
#[command(
    name = "governance-daemon",
    version,
    about = "Apply, roll back and self-heal governance proposals."
)]
struct Cli {
    /// Project root (default: GOVERNANCE_PROJECT_ROOT, then the working directory).
    #[arg(long, global = true)]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Apply a proposal directory and start monitoring it.
    Apply {
        /// Proposal directory, relative to the project root or absolute.
        dir: PathBuf,

        /// Require the site policy to allow fully automatic application.
        #[arg(long)]
        auto: bool,
    },

    /// Roll back an applied record.
    Rollback {
        record_id: String,
    },

    /// List applied records.
    Records,

    /// Refresh metrics and run one auto-heal sweep.
    Heal,

    /// Show self-healing statistics.
    Status,

    /// Run the scheduler until interrupted.
    Watch {
        #[arg(long, default_value_t = 300)]
        interval_secs: u64,
    },
}

struct Daemon {
    engine: Arc<ProposalApplyEngine>,
    monitor: Arc<SelfHealingMonitor>,
    metrics: Arc<dyn MetricsSource>,
    store: Arc<dyn ProposalStore>,
    events: Arc<EventBus>,
}

impl Daemon {
    async fn open(paths: &GovernancePaths) -> Result<Self> {
        let engine = Arc::new(ProposalApplyEngine::new(paths.engine_config()));
        let monitor = SelfHealingMonitor::open(
            paths.self_healing_dir.clone(),
            Arc::new(EngineReverter::new(engine.clone())),
        )
        .await
        .with_context(|| format!("opening self-healing state in {}", paths.self_healing_dir.display()))?;

        let events = Arc::new(EventBus::new());
        events.on(|event| info!(event = event.kind(), "governance event"));

        Ok(Self {
            engine,
            monitor: Arc::new(monitor),
            metrics: Arc::new(TaskLogMetricsSource::new(paths.task_log.clone())),
            store: Arc::new(JsonFileProposalStore::new(paths.proposals_dir.clone())),
            events,
        })
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.monitor.clone(),
            self.metrics.clone(),
            self.store.clone(),
            self.events.clone(),
        )
    }

    async fn apply(&self, dir: PathBuf, auto: bool) -> Result<()> {
        let applier = DirectoryProposalApplier::new(self.engine.clone())
            .with_monitor(self.monitor.clone(), self.metrics.clone());
        let mode = if auto { ApplyMode::Automatic } else { ApplyMode::Approved };

        let report = applier.apply_dir(None, &dir, mode).await?;
        print_json(&report)?;
        if !report.applied {
            bail!("proposal in {} was not applied", dir.display());
        }
        Ok(())
    }

    async fn rollback(&self, record_id: &str) -> Result<()> {
        let tracked = self
            .monitor
            .applications()
            .await
            .into_iter()
            .find(|a| a.applied_record_id.as_deref() == Some(record_id) && !a.rolled_back);

        let Some(application) = tracked else {
            let report = self.engine.rollback_proposal(record_id).await?;
            return print_json(&report);
        };

        let action = self
            .monitor
            .rollback(&application.id, "manual rollback", false, MANUAL_TRIGGER)
            .await?;
        print_json(&action)?;
        if action.result == RollbackResult::Failed {
            bail!("rollback of {record_id} restored nothing");
        }

        if let Some(mut proposal) = self.store.get(&application.proposal_id).await? {
            if proposal.status.can_transition_to(ProposalStatus::RolledBack) {
                proposal.transition_to(ProposalStatus::RolledBack)?;
                self.store.save(&proposal).await?;
            }
        }
        Ok(())
    }

    async fn records(&self) -> Result<()> {
        let mut listing = Vec::new();
        for record in self.engine.list_applied_records().await? {
            let rolled_back = self.engine.is_rolled_back(&record.id).await?;
            listing.push(serde_json::json!({ "record": record, "rolledBack": rolled_back }));
        }
        print_json(&listing)
    }

    async fn watch(&self, interval_secs: u64) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(true);
            }
        });

        self.scheduler()
            .run(Duration::from_secs(interval_secs.max(1)), shutdown_rx)
            .await;
        Ok(())
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LoggingConfig::from_env())?;

    let paths = cli
        .project_root
        .map(GovernancePaths::for_project)
        .unwrap_or_else(GovernancePaths::from_env);
    let daemon = Daemon::open(&paths).await?;

    match cli.cmd {
        Cmd::Apply { dir, auto } => daemon.apply(dir, auto).await,
        Cmd::Rollback { record_id } => daemon.rollback(&record_id).await,
        Cmd::Records => daemon.records().await,
        Cmd::Heal => {
            let report = daemon.scheduler().tick().await?;
            print_json(&report)
        }
        Cmd::Status => print_json(&daemon.monitor.statistics().await),
        Cmd::Watch { interval_secs } => daemon.watch(interval_secs).await,
    }
}
