//! Phase 2: resolve variable references.

use tracing::{info, warn};
use zeropoint_core::{resource_key, ReconcileResponse, ResourceTable};

use super::{PhaseResult, RunContext};
use crate::vars::VarResolver;

pub(super) async fn run(run: &mut RunContext<'_>) -> PhaseResult {
    let resolved = VarResolver::new(&run.desired, &run.ctx)
        .resolve_all()
        .map_err(|unresolved| {
            warn!(var = %unresolved.var, reference = %unresolved.reference, "Unresolved variable");
            ReconcileResponse::failed(
                resource_key(ResourceTable::Vars, &unresolved.var),
                unresolved.to_string(),
            )
        })?;

    info!(count = resolved.len(), "Resolved variables");
    run.ctx.set_vars(resolved);
    Ok(())
}
