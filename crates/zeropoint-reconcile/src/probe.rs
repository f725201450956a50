//! Observing the live host.

use async_trait::async_trait;
use zeropoint_core::{ResourceTable, Result, Snapshot};

/// Reports live host state for the probed tables.
///
/// Only [`ResourceTable::PROBED`] tables of the returned snapshot are read;
/// anything else is ignored. Failures should be
/// [`ZeropointError::ProbeFailure`](zeropoint_core::ZeropointError::ProbeFailure).
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> Result<Snapshot>;
}

/// Keep only the probed tables of `report`; every other table is empty.
pub fn probed_tables(report: &Snapshot) -> Snapshot {
    let mut out = Snapshot::new();
    for table in ResourceTable::PROBED {
        out.set_rows(table, report.rows(table).to_vec());
    }
    out
}
