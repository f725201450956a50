//! Phase 0: capture intent and observe the host.

use tracing::info;
use zeropoint_core::{ReconcileResponse, ResourceTable};
use zeropoint_state::Branch;

use super::{PhaseResult, RunContext};
use crate::probe::probed_tables;

/// Tables that are never probed and are taken from reality instead.
const FROM_REALITY: [ResourceTable; 2] = [ResourceTable::Vars, ResourceTable::Links];

pub(super) async fn run(run: &mut RunContext<'_>) -> PhaseResult {
    let intent = run
        .store
        .snapshot(Branch::Intent)
        .await
        .map_err(|e| ReconcileResponse::failed("probe", format!("cannot read intent: {e}")))?;

    let report = run
        .probe
        .probe()
        .await
        .map_err(|e| ReconcileResponse::failed("probe", e.to_string()))?;

    let reality = run
        .store
        .snapshot(Branch::Reality)
        .await
        .map_err(|e| ReconcileResponse::failed("probe", format!("cannot read reality: {e}")))?;

    let mut actual = probed_tables(&report);
    for table in FROM_REALITY {
        actual.set_rows(table, reality.snapshot.rows(table).to_vec());
    }

    info!(
        intent = intent.commit.short(),
        reality = reality.commit.short(),
        "Captured intent and probed host"
    );

    run.target = Some(intent.commit);
    run.desired = intent.snapshot;
    run.actual = actual;
    Ok(())
}
