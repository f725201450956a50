//! Error types for the Zeropoint agent.

use thiserror::Error;

/// Main error type for Zeropoint operations.
#[derive(Error, Debug, Clone)]
pub enum ZeropointError {
    /// A resource description is malformed or missing a required field.
    #[error("Invalid {table} resource: {message}")]
    Validation { table: String, message: String },

    /// An idempotent command could not complete.
    #[error("Command failed for {resource}: {message}")]
    CommandFailure { resource: String, message: String },

    /// The host could not be observed.
    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    /// A fast-forward is impossible because the branches no longer share a linear history.
    #[error("Branches diverged: cannot fast-forward reality ({reality}) to {target}")]
    Divergence { reality: String, target: String },

    /// A commit id did not resolve against the intent history.
    #[error("Unknown commit: {0}")]
    UnknownCommit(String),

    /// The store could not be brought up.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Table name outside the known resource tables.
    #[error("Unknown resource table: {0}")]
    UnknownTable(String),

    /// The resource log or a checkout is unreadable or inconsistent.
    #[error("State store error: {message}")]
    Storage { message: String },

    /// Relational cache failure.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl ZeropointError {
    /// Shorthand for a validation error on `table`.
    pub fn validation(table: impl Into<String>, message: impl Into<String>) -> Self {
        ZeropointError::Validation {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        ZeropointError::Storage {
            message: message.into(),
        }
    }

    /// Returns true if the caller supplied bad input and nothing was mutated.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ZeropointError::Validation { .. }
                | ZeropointError::UnknownTable(_)
                | ZeropointError::UnknownCommit(_)
        )
    }

    /// Returns true if this error signals a broken branch invariant.
    pub fn is_divergence(&self) -> bool {
        matches!(self, ZeropointError::Divergence { .. })
    }
}

/// Convenience Result type for Zeropoint operations.
pub type Result<T> = std::result::Result<T, ZeropointError>;

impl From<serde_json::Error> for ZeropointError {
    fn from(err: serde_json::Error) -> Self {
        ZeropointError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for ZeropointError {
    fn from(err: std::io::Error) -> Self {
        ZeropointError::Io(err.to_string())
    }
}
