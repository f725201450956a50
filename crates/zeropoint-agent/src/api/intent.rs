//! Intent authoring endpoint.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use zeropoint_core::{CommitId, ReconcileResponse, ResourceRow, ResourceTable};

use super::{error_response, ApiError};
use crate::state::AppState;

/// Request to replace one table on the intent branch.
#[derive(Debug, Deserialize)]
pub struct WriteIntentRequest {
    /// Full new contents of the table.
    pub rows: serde_json::Value,

    /// Commit message. Defaults to "Update <table>".
    #[serde(default)]
    pub message: String,

    /// Start a background reconcile once committed.
    #[serde(default)]
    pub reconcile: bool,
}

/// Response after committing intent.
#[derive(Debug, Serialize)]
pub struct WriteIntentResponse {
    /// Short id of the new intent commit.
    pub intent_id: String,
    pub commit: CommitId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileResponse>,
}

/// Replace `table` on the intent branch.
pub async fn write_intent(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(request): Json<WriteIntentRequest>,
) -> Result<(StatusCode, Json<WriteIntentResponse>), ApiError> {
    let table: ResourceTable = table.parse().map_err(error_response)?;
    let rows = ResourceRow::list_from_value(table, request.rows).map_err(error_response)?;

    let commit = state
        .store
        .write_intent(table, rows, &request.message)
        .await
        .map_err(error_response)?;

    let reconcile = request.reconcile.then(|| {
        let trigger = Uuid::new_v4().to_string();
        info!(trigger = %trigger, "Reconcile requested with intent {}", commit.short());
        state.executor.trigger(Some(trigger))
    });

    Ok((
        StatusCode::CREATED,
        Json(WriteIntentResponse {
            intent_id: commit.short().to_string(),
            commit,
            reconcile,
        }),
    ))
}
