//! # Zeropoint Core
//!
//! Core primitives and types for the Zeropoint agent.
//!
//! This crate provides the fundamental building blocks:
//! - [`ResourceRow`] - Typed rows of the resource tables
//! - [`Snapshot`] - Full state of every table at one point in history
//! - [`CommitId`] - Content-addressed identifier of a snapshot write
//! - [`ReconcileResponse`] / [`CommandResult`] - Outcomes of reconciliation
//! - [`ZeropointError`] - Error taxonomy

pub mod commit;
pub mod error;
pub mod resource;
pub mod snapshot;
pub mod types;

// Re-exports for convenience
pub use commit::{content_hash, CommitId};
pub use error::{Result, ZeropointError};
pub use resource::{
    resource_key, validate_rows, DiskRow, ExposureRow, LinkRow, ModuleRow, MountRow, PathRow,
    Resource, ResourceRow, ResourceTable, VarRow,
};
pub use snapshot::{table_document, Snapshot};
pub use types::*;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::commit::CommitId;
    pub use crate::error::{Result, ZeropointError};
    pub use crate::resource::{Resource, ResourceRow, ResourceTable};
    pub use crate::snapshot::Snapshot;
    pub use crate::types::{
        BlockedReason, CommandResult, CommandStatus, Operation, ReconcileResponse,
        ReconcileResult,
    };
}
