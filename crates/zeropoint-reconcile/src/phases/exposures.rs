//! Phase 4: network exposures of modules.

use zeropoint_core::{ExposureRow, ResourceTable};

use super::{PhaseResult, RunContext};

pub(super) async fn run(run: &mut RunContext<'_>) -> PhaseResult {
    for exposure in run.desired.typed::<ExposureRow>() {
        run.require(exposure, ResourceTable::Modules, &exposure.module)?;
    }
    run.converge(ResourceTable::Exposures).await
}
