//! On-demand reconcile trigger.

use axum::{extract::State, http::StatusCode, Json};
use serde::Deserialize;
use uuid::Uuid;
use zeropoint_core::ReconcileResponse;

use crate::state::AppState;

/// Optional request body.
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    /// Caller-supplied trigger id; a fresh one is generated otherwise.
    pub trigger_id: Option<String>,
}

/// Start a background reconcile. Answers `running`, or `waiting` if one is
/// already in flight.
pub async fn trigger_reconcile(
    State(state): State<AppState>,
    request: Option<Json<ReconcileRequest>>,
) -> (StatusCode, Json<ReconcileResponse>) {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let trigger = request
        .trigger_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response = state.executor.trigger(Some(trigger));
    (StatusCode::ACCEPTED, Json(response))
}
