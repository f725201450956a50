//! Application state.

use std::sync::Arc;

use zeropoint_reconcile::Executor;
use zeropoint_state::StateStore;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// The dual-branch state store.
    pub store: Arc<dyn StateStore>,

    /// The reconciliation engine.
    pub executor: Executor,
}

impl AppState {
    /// Create a new application state.
    pub fn new(store: Arc<dyn StateStore>, executor: Executor) -> Self {
        Self { store, executor }
    }
}
