//! The ordered reconciliation phases.
//!
//! Each phase compares desired against actual state and drives the host
//! through registered commands. A phase either completes (`Ok`) or stops the
//! pipeline with the response to report; nothing already applied is rolled
//! back.

mod convergence;
mod exposures;
mod modules;
mod probe;
mod storage;
mod vars;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeropoint_core::{
    resource_key, BlockedReason, CommandResult, CommandStatus, CommitId, Operation,
    ReconcileResponse, Resource, ResourceRow, ResourceTable, Snapshot,
};
use zeropoint_state::StateStore;

use crate::command::{CommandContext, CommandRegistry};
use crate::executor::RebootPolicy;
use crate::probe::Probe;

pub use convergence::{first_divergence, Mismatch};

/// Outcome of one phase: `Err` carries the response that ends the run.
pub(crate) type PhaseResult = Result<(), ReconcileResponse>;

/// Pipeline phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Probe,
    Storage,
    Vars,
    Modules,
    Exposures,
    Convergence,
}

impl Phase {
    pub const ALL: [Phase; 6] = [
        Phase::Probe,
        Phase::Storage,
        Phase::Vars,
        Phase::Modules,
        Phase::Exposures,
        Phase::Convergence,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Probe => "probe",
            Phase::Storage => "storage",
            Phase::Vars => "vars",
            Phase::Modules => "modules",
            Phase::Exposures => "exposures",
            Phase::Convergence => "convergence",
        }
    }

    pub fn number(&self) -> usize {
        *self as usize
    }

    pub(crate) async fn run(self, run: &mut RunContext<'_>) -> PhaseResult {
        match self {
            Phase::Probe => probe::run(run).await,
            Phase::Storage => storage::run(run).await,
            Phase::Vars => vars::run(run).await,
            Phase::Modules => modules::run(run).await,
            Phase::Exposures => exposures::run(run).await,
            Phase::Convergence => convergence::run(run).await,
        }
    }
}

/// Everything one reconciliation run reads and accumulates.
pub(crate) struct RunContext<'a> {
    pub store: &'a dyn StateStore,
    pub probe: &'a dyn Probe,
    pub commands: &'a CommandRegistry,
    pub reboot_policy: RebootPolicy,

    /// Intent snapshot captured in phase 0.
    pub desired: Snapshot,
    /// Probed tables plus vars and links from reality.
    pub actual: Snapshot,
    /// Intent tip captured in phase 0; the commit merged on success.
    pub target: Option<CommitId>,
    /// Reality tip after a successful merge.
    pub merged: Option<CommitId>,

    pub ctx: CommandContext,
}

impl<'a> RunContext<'a> {
    pub fn new(
        store: &'a dyn StateStore,
        probe: &'a dyn Probe,
        commands: &'a CommandRegistry,
        reboot_policy: RebootPolicy,
        trigger: Option<String>,
    ) -> Self {
        Self {
            store,
            probe,
            commands,
            reboot_policy,
            desired: Snapshot::new(),
            actual: Snapshot::new(),
            target: None,
            merged: None,
            ctx: CommandContext::new(trigger),
        }
    }

    pub fn changes(&self, table: ResourceTable) -> TableChanges {
        diff(self.desired.rows(table), self.actual.rows(table))
    }

    /// Run one command and translate a non-applied result into a stop.
    pub async fn apply(&mut self, operation: Operation, row: &ResourceRow) -> PhaseResult {
        let result = self.commands.execute(operation, row, &self.ctx).await;
        let key = row.key();

        if result.is_applied() {
            if let Some(output) = result.output {
                self.ctx.record_output(key, output);
            }
            return Ok(());
        }

        let blocked = match result.status {
            CommandStatus::Blocked => result
                .reason
                .as_deref()
                .and_then(|r| r.parse::<BlockedReason>().ok()),
            _ => None,
        };
        match blocked {
            Some(reason) => Err(ReconcileResponse::blocked(reason, vec![key])),
            None => Err(ReconcileResponse::failed(key, command_error(operation, &result))),
        }
    }

    pub async fn apply_all(&mut self, operation: Operation, rows: &[ResourceRow]) -> PhaseResult {
        for row in rows {
            self.apply(operation, row).await?;
        }
        Ok(())
    }

    /// Release removed rows, then add new ones, then edit changed ones.
    pub async fn converge(&mut self, table: ResourceTable) -> PhaseResult {
        let changes = self.changes(table);
        if changes.is_empty() {
            debug!(%table, "Table already converged");
            return Ok(());
        }
        self.apply_all(Operation::Release, &changes.release).await?;
        self.apply_all(Operation::Add, &changes.add).await?;
        self.apply_all(Operation::Edit, &changes.edit).await
    }

    /// Fail unless `table:id` is part of the desired state.
    pub fn require<R: Resource>(&self, owner: &R, table: ResourceTable, id: &str) -> PhaseResult {
        if self.desired.contains(table, id) {
            return Ok(());
        }
        Err(ReconcileResponse::failed(
            resource_key(R::TABLE, owner.id()),
            format!("depends on {} {id:?}, which is not desired", table.singular()),
        )
        .with_reason(BlockedReason::MissingDependency))
    }
}

pub(crate) fn command_error(operation: Operation, result: &CommandResult) -> String {
    result
        .error
        .clone()
        .or_else(|| result.reason.as_ref().map(|r| format!("blocked: {r}")))
        .unwrap_or_else(|| format!("{operation} did not apply"))
}

/// Rows to add, edit and release to turn `actual` into `desired`.
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct TableChanges {
    pub add: Vec<ResourceRow>,
    pub edit: Vec<ResourceRow>,
    /// Taken from the actual side.
    pub release: Vec<ResourceRow>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.edit.is_empty() && self.release.is_empty()
    }
}

pub(crate) fn diff(desired: &[ResourceRow], actual: &[ResourceRow]) -> TableChanges {
    let mut changes = TableChanges::default();
    for row in desired {
        match actual.iter().find(|a| a.id() == row.id()) {
            None => changes.add.push(row.clone()),
            Some(current) if current != row => changes.edit.push(row.clone()),
            Some(_) => {}
        }
    }
    changes.release = actual
        .iter()
        .filter(|a| !desired.iter().any(|d| d.id() == a.id()))
        .cloned()
        .collect();
    changes
}
