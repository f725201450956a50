//! Phase 1: disks, then mounts, then paths.
//!
//! The reboot gate is settled before anything else runs: while a new disk
//! waits for a reboot, no mount or path is touched, removals included.
//! Removals then run in reverse dependency order.

use tracing::{info, warn};
use zeropoint_core::{
    BlockedReason, CommandStatus, MountRow, Operation, PathRow, ReconcileResponse, ResourceRow,
    ResourceTable,
};

use super::{command_error, PhaseResult, RunContext};
use crate::executor::RebootPolicy;

pub(super) async fn run(run: &mut RunContext<'_>) -> PhaseResult {
    let disks = run.changes(ResourceTable::Disks);
    let mounts = run.changes(ResourceTable::Mounts);
    let paths = run.changes(ResourceTable::Paths);

    match run.reboot_policy {
        RebootPolicy::AnyNewDisk => gate_new_disks(&disks.add)?,
        RebootPolicy::PartitionChangesOnly => stage_new_disks(run, &disks.add).await?,
    }

    run.apply_all(Operation::Release, &paths.release).await?;
    run.apply_all(Operation::Release, &mounts.release).await?;
    run.apply_all(Operation::Release, &disks.release).await?;
    run.apply_all(Operation::Edit, &disks.edit).await?;

    for mount in run.desired.typed::<MountRow>() {
        run.require(mount, ResourceTable::Disks, &mount.disk_id)?;
    }
    run.apply_all(Operation::Add, &mounts.add).await?;
    run.apply_all(Operation::Edit, &mounts.edit).await?;

    for path in run.desired.typed::<PathRow>() {
        run.require(path, ResourceTable::Mounts, &path.mount_id)?;
    }
    run.apply_all(Operation::Add, &paths.add).await?;
    run.apply_all(Operation::Edit, &paths.edit).await
}

/// Every disk id absent from the host waits for a reboot. No command runs.
fn gate_new_disks(new_disks: &[ResourceRow]) -> PhaseResult {
    if new_disks.is_empty() {
        return Ok(());
    }
    let pending: Vec<String> = new_disks.iter().map(ResourceRow::key).collect();
    warn!(pending = ?pending, "New disks present in intent; reboot required before storage can settle");
    Err(ReconcileResponse::blocked(BlockedReason::RebootRequired, pending))
}

/// Run `add` for every new disk, then block if any of them reported that it
/// needs a reboot. Disks that attach at once go through.
async fn stage_new_disks(run: &mut RunContext<'_>, new_disks: &[ResourceRow]) -> PhaseResult {
    let mut gated = Vec::new();

    for disk in new_disks {
        let key = disk.key();
        let result = run.commands.execute(Operation::Add, disk, &run.ctx).await;
        match result.status {
            CommandStatus::Failed => {
                return Err(ReconcileResponse::failed(
                    key,
                    command_error(Operation::Add, &result),
                ))
            }
            CommandStatus::Blocked => gated.push(key),
            CommandStatus::Applied => {
                if let Some(output) = result.output {
                    run.ctx.record_output(key, output);
                }
            }
        }
    }

    if gated.is_empty() {
        if !new_disks.is_empty() {
            info!(count = new_disks.len(), "New disks applied without reboot");
        }
        return Ok(());
    }

    warn!(pending = ?gated, "New disks staged; reboot required before storage can settle");
    Err(ReconcileResponse::blocked(BlockedReason::RebootRequired, gated))
}
