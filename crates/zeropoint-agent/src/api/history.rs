//! Commit history of a branch.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use zeropoint_state::{Branch, Commit};

use super::{error_response, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

/// Commits reachable from `branch`, newest first.
pub async fn get_history(
    State(state): State<AppState>,
    Path(branch): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Commit>>, ApiError> {
    let branch: Branch = branch.parse().map_err(error_response)?;
    let commits = state
        .store
        .history(branch, query.limit)
        .await
        .map_err(error_response)?;
    Ok(Json(commits))
}
