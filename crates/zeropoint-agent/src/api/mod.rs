//! HTTP surface over the state store and the executor.

use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use zeropoint_core::ZeropointError;

use crate::state::AppState;

pub mod health;
pub mod history;
pub mod intent;
pub mod reconcile;
pub mod state;
pub mod status;

/// Error half of every handler's result.
pub type ApiError = (StatusCode, String);

/// Map a store or engine error onto an HTTP status.
pub fn error_response(err: ZeropointError) -> ApiError {
    let status = match &err {
        ZeropointError::Validation { .. } => StatusCode::BAD_REQUEST,
        ZeropointError::UnknownTable(_) | ZeropointError::UnknownCommit(_) => {
            StatusCode::NOT_FOUND
        }
        ZeropointError::Divergence { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if err.is_divergence() {
        error!("{err}");
    } else if status.is_server_error() {
        warn!("{err}");
    }
    (status, err.to_string())
}

/// Create the API router.
pub fn router(state: AppState) -> Router {
    // CORS layer
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(health::health_check))

        // State reads
        .route("/api/v1/state/:table/desired", get(state::get_desired))
        .route("/api/v1/state/:table/actual", get(state::get_actual))

        // Intent authoring
        .route("/api/v1/intent/:table", put(intent::write_intent))

        // Engine
        .route("/api/v1/reconcile", post(reconcile::trigger_reconcile))
        .route("/api/v1/status", get(status::get_status))
        .route("/api/v1/history/:branch", get(history::get_history))

        // Add middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
