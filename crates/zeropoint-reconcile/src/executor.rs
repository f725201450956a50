//! The reconciliation engine.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeropoint_core::{
    BlockedReason, CommitId, ReconcileResponse, ReconcileResult, ZeropointError,
};
use zeropoint_state::StateStore;

use crate::command::CommandRegistry;
use crate::phases::{Phase, RunContext};
use crate::probe::Probe;

/// When a new disk stops the storage phase for a reboot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebootPolicy {
    /// Every disk id absent from the host gates on a reboot; their `add`
    /// commands are not run.
    #[default]
    AnyNewDisk,
    /// Only disks whose `add` command reports `blocked` gate.
    PartitionChangesOnly,
}

impl RebootPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebootPolicy::AnyNewDisk => "any_new_disk",
            RebootPolicy::PartitionChangesOnly => "partition_changes_only",
        }
    }
}

impl fmt::Display for RebootPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RebootPolicy {
    type Err = ZeropointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any_new_disk" => Ok(RebootPolicy::AnyNewDisk),
            "partition_changes_only" => Ok(RebootPolicy::PartitionChangesOnly),
            other => Err(ZeropointError::validation(
                "reboot_policy",
                format!("unknown reboot policy {other:?}"),
            )),
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub reboot_policy: RebootPolicy,
}

/// Phase-machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Blocked,
}

impl EngineState {
    /// Enter `Running`. Returns `None` if a run is already in flight.
    pub fn begin(self) -> Option<EngineState> {
        match self {
            EngineState::Idle | EngineState::Blocked => Some(EngineState::Running),
            EngineState::Running => None,
        }
    }

    /// Leave `Running` according to the run's result.
    pub fn finish(self, result: ReconcileResult) -> EngineState {
        match (self, result) {
            (EngineState::Running, ReconcileResult::Blocked) => EngineState::Blocked,
            (EngineState::Running, _) => EngineState::Idle,
            (other, _) => other,
        }
    }

    pub fn is_running(&self) -> bool {
        *self == EngineState::Running
    }
}

/// Process-lifetime view of the engine. Never persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileState {
    pub state: EngineState,
    pub reboot_required: bool,
    pub pending_resources: Vec<String>,
    pub last_committed_id: Option<CommitId>,
    pub last_trigger: Option<String>,
    pub last_response: Option<ReconcileResponse>,
    pub last_finished_at: Option<DateTime<Utc>>,
}

fn lock(state: &Mutex<ReconcileState>) -> MutexGuard<'_, ReconcileState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the engine in `Running`; restores a resting state when dropped.
struct RunGuard {
    state: Arc<Mutex<ReconcileState>>,
    finished: bool,
}

impl RunGuard {
    fn finish(mut self, response: &ReconcileResponse, committed: Option<CommitId>) {
        let mut state = lock(&self.state);
        state.state = state.state.finish(response.result);
        state.reboot_required = response.reason == Some(BlockedReason::RebootRequired);
        state.pending_resources = response.pending_resources.clone();
        if committed.is_some() {
            state.last_committed_id = committed;
        }
        state.last_response = Some(response.clone());
        state.last_finished_at = Some(Utc::now());
        drop(state);
        self.finished = true;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let mut state = lock(&self.state);
        if state.state.is_running() {
            warn!("Reconciliation ended without a result; resetting to idle");
            state.state = EngineState::Idle;
            state.last_response = Some(ReconcileResponse::failed(
                "executor",
                "reconciliation was interrupted",
            ));
        }
    }
}

/// Runs the phase pipeline with a single-flight guarantee.
///
/// Cheap to clone; clones share the same state machine.
#[derive(Clone)]
pub struct Executor {
    store: Arc<dyn StateStore>,
    probe: Arc<dyn Probe>,
    commands: Arc<CommandRegistry>,
    config: ExecutorConfig,
    state: Arc<Mutex<ReconcileState>>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn StateStore>,
        probe: Arc<dyn Probe>,
        commands: CommandRegistry,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            probe,
            commands: Arc::new(commands),
            config,
            state: Arc::new(Mutex::new(ReconcileState::default())),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn state(&self) -> ReconcileState {
        lock(&self.state).clone()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).state.is_running()
    }

    /// Run a full reconciliation and return its outcome.
    ///
    /// Returns `waiting` without doing any work if a run is in flight.
    pub async fn reconcile(&self, trigger: Option<String>) -> ReconcileResponse {
        let Some(guard) = self.begin(trigger.as_deref()) else {
            info!(trigger = ?trigger, "Reconciliation already running");
            return ReconcileResponse::waiting();
        };
        self.drive(guard, trigger).await
    }

    /// Start a reconciliation in the background and return `running`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn trigger(&self, trigger: Option<String>) -> ReconcileResponse {
        let Some(guard) = self.begin(trigger.as_deref()) else {
            info!(trigger = ?trigger, "Reconciliation already running");
            return ReconcileResponse::waiting();
        };

        let executor = self.clone();
        tokio::spawn(async move {
            executor.drive(guard, trigger).await;
        });
        ReconcileResponse::running()
    }

    fn begin(&self, trigger: Option<&str>) -> Option<RunGuard> {
        let mut state = lock(&self.state);
        state.state = state.state.begin()?;
        state.last_trigger = trigger.map(str::to_string);
        Some(RunGuard {
            state: Arc::clone(&self.state),
            finished: false,
        })
    }

    async fn drive(&self, guard: RunGuard, trigger: Option<String>) -> ReconcileResponse {
        let started = Instant::now();
        info!(trigger = ?trigger, "Reconciliation started");

        let (response, committed) = match AssertUnwindSafe(self.run_pipeline(trigger))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => (
                ReconcileResponse::failed("executor", panic_message(panic.as_ref())),
                None,
            ),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match response.result {
            ReconcileResult::Applied => info!(
                elapsed_ms,
                reality = ?committed.as_ref().map(CommitId::short),
                "Reconciliation applied"
            ),
            _ => warn!(
                elapsed_ms,
                result = ?response.result,
                reason = ?response.reason,
                error = ?response.error,
                pending = ?response.pending_resources,
                "Reconciliation stopped"
            ),
        }

        guard.finish(&response, committed);
        response
    }

    async fn run_pipeline(&self, trigger: Option<String>) -> (ReconcileResponse, Option<CommitId>) {
        let mut run = RunContext::new(
            self.store.as_ref(),
            self.probe.as_ref(),
            &self.commands,
            self.config.reboot_policy,
            trigger,
        );

        for phase in Phase::ALL {
            debug!(phase = phase.as_str(), number = phase.number(), "Phase started");
            match AssertUnwindSafe(phase.run(&mut run)).catch_unwind().await {
                Ok(Ok(())) => info!(phase = phase.as_str(), "Phase applied"),
                Ok(Err(response)) => return (response, None),
                Err(panic) => {
                    let message = format!("phase panicked: {}", panic_message(panic.as_ref()));
                    return (ReconcileResponse::failed(phase.as_str(), message), None);
                }
            }
        }

        (ReconcileResponse::applied(), run.merged)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("commands", &self.commands)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
