//! Phase 5: verify the host and promote intent to reality.

use std::fmt;

use tracing::{error, info};
use zeropoint_core::{ReconcileResponse, ResourceTable, Snapshot};

use super::{PhaseResult, RunContext};
use crate::probe::probed_tables;

/// A probed resource that does not match intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// `table:id` of the divergent resource.
    pub resource: String,
    pub message: String,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

/// First probed resource whose actual state differs from `desired`.
///
/// Tables are checked in dependency order, rows by id.
pub fn first_divergence(desired: &Snapshot, actual: &Snapshot) -> Option<Mismatch> {
    for table in ResourceTable::PROBED {
        for row in desired.rows(table) {
            let message = match actual.get(table, row.id()) {
                None => "missing from host after apply".to_string(),
                Some(found) if found != row => {
                    format!("host reports {} but intent is {}", found.to_value(), row.to_value())
                }
                Some(_) => continue,
            };
            return Some(Mismatch {
                resource: row.key(),
                message,
            });
        }

        let extra = actual
            .rows(table)
            .iter()
            .find(|row| !desired.contains(table, row.id()));
        if let Some(extra) = extra {
            return Some(Mismatch {
                resource: extra.key(),
                message: "still present on host after release".to_string(),
            });
        }
    }
    None
}

pub(super) async fn run(run: &mut RunContext<'_>) -> PhaseResult {
    let report = run
        .probe
        .probe()
        .await
        .map_err(|e| ReconcileResponse::failed("probe", e.to_string()))?;

    if let Some(mismatch) = first_divergence(&run.desired, &probed_tables(&report)) {
        return Err(ReconcileResponse::failed(mismatch.resource, mismatch.message));
    }

    let target = run
        .target
        .clone()
        .ok_or_else(|| ReconcileResponse::failed("merge", "no intent commit was captured"))?;

    let merged = run
        .store
        .merge_to_main(target.as_str())
        .await
        .map_err(|e| {
            if e.is_divergence() {
                error!(target = target.short(), "🚨 Reality diverged from intent: {e}");
            }
            ReconcileResponse::failed("merge", e.to_string())
        })?;

    info!(reality = merged.short(), "Host converged; reality advanced");
    run.merged = Some(merged);
    Ok(())
}
