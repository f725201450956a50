//! Read endpoints for the two branches.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use zeropoint_core::{ResourceRow, ResourceTable};
use zeropoint_state::Branch;

use super::{error_response, ApiError};
use crate::state::AppState;

/// Rows of one table on one branch.
#[derive(Debug, Serialize)]
pub struct TableResponse {
    pub table: ResourceTable,
    pub branch: Branch,
    pub rows: Vec<ResourceRow>,
}

/// Rows of `table` on the intent branch.
pub async fn get_desired(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<TableResponse>, ApiError> {
    let table: ResourceTable = table.parse().map_err(error_response)?;
    let rows = state.store.get_desired(table).await.map_err(error_response)?;

    Ok(Json(TableResponse {
        table,
        branch: Branch::Intent,
        rows,
    }))
}

/// Rows of `table` on the reality branch.
pub async fn get_actual(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> Result<Json<TableResponse>, ApiError> {
    let table: ResourceTable = table.parse().map_err(error_response)?;
    let rows = state.store.get_actual(table).await.map_err(error_response)?;

    Ok(Json(TableResponse {
        table,
        branch: Branch::Reality,
        rows,
    }))
}
