//! Branch and engine status.

use axum::{extract::State, Json};
use serde::Serialize;
use zeropoint_reconcile::ReconcileState;
use zeropoint_state::BranchStatus;

use super::{error_response, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub branches: BranchStatus,
    pub engine: ReconcileState,
}

/// How far intent is ahead of reality, and what the engine last did.
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let branches = state.store.status().await.map_err(error_response)?;

    Ok(Json(StatusResponse {
        branches,
        engine: state.executor.state(),
    }))
}
