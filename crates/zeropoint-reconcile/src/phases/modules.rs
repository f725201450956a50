//! Phase 3: modules, then the links between them.

use zeropoint_core::{LinkRow, ResourceTable};

use super::{PhaseResult, RunContext};

pub(super) async fn run(run: &mut RunContext<'_>) -> PhaseResult {
    run.converge(ResourceTable::Modules).await?;

    for link in run.desired.typed::<LinkRow>() {
        run.require(link, ResourceTable::Modules, &link.from_module)?;
        run.require(link, ResourceTable::Modules, &link.to_module)?;
    }
    run.converge(ResourceTable::Links).await
}
