// governance-loop-rs/src/events.rs
// In-process publish/subscribe surface for pipeline observability.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::warn;

use governance_types::{Proposal, Signal};
use self_healing::RollbackResult;

/// Everything the loop reports, in emission order within a cycle:
/// `signal_detected -> proposal_generated -> proposal_approved|rejected ->
/// proposal_applied|failed -> cycle_complete`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GovernanceEvent {
    SignalDetected {
        signal: Signal,
    },
    ProposalGenerated {
        proposal: Proposal,
    },
    ProposalApproved {
        proposal_id: String,
        reviewed_by: String,
        reason: String,
    },
    ProposalRejected {
        proposal_id: String,
        reviewed_by: String,
        reason: String,
    },
    ProposalApplied {
        proposal_id: String,
        applied_record_id: Option<String>,
        changed_files: Vec<String>,
    },
    ProposalFailed {
        proposal_id: String,
        error: String,
    },
    ApplicationRolledBack {
        proposal_id: String,
        application_id: Option<String>,
        restored_files: Vec<String>,
        result: RollbackResult,
        automatic: bool,
    },
    CycleComplete {
        signals: usize,
        proposals: usize,
    },
    Error {
        message: String,
    },
}

impl GovernanceEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GovernanceEvent::SignalDetected { .. } => "signal_detected",
            GovernanceEvent::ProposalGenerated { .. } => "proposal_generated",
            GovernanceEvent::ProposalApproved { .. } => "proposal_approved",
            GovernanceEvent::ProposalRejected { .. } => "proposal_rejected",
            GovernanceEvent::ProposalApplied { .. } => "proposal_applied",
            GovernanceEvent::ProposalFailed { .. } => "proposal_failed",
            GovernanceEvent::ApplicationRolledBack { .. } => "application_rolled_back",
            GovernanceEvent::CycleComplete { .. } => "cycle_complete",
            GovernanceEvent::Error { .. } => "error",
        }
    }
}

type Listener = Arc<dyn Fn(&GovernanceEvent) + Send + Sync>;

/// Handle returned by [`EventBus::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Observer list. Delivery is synchronous and fire-and-forget: a panicking
/// listener is logged and skipped, the remaining listeners still run.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GovernanceEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false when `id` was not subscribed.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    pub fn emit(&self, event: GovernanceEvent) {
        // Snapshot so listeners may subscribe or unsubscribe while handling.
        let listeners: Vec<Listener> = self.lock().iter().map(|(_, l)| Arc::clone(l)).collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                warn!(event = event.kind(), "event listener panicked");
                metrics::increment_counter!("governance_listener_failures_total", "event" => event.kind());
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener)>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
