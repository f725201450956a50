//! Result types shared by commands, the executor and callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ZeropointError;

/// Kind of state transition a command performs on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Resource is desired but absent.
    Add,
    /// Resource exists with different settings.
    Edit,
    /// Resource exists but is no longer desired.
    #[serde(alias = "delete")]
    Release,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Edit => "edit",
            Operation::Release => "release",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = ZeropointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Operation::Add),
            "edit" => Ok(Operation::Edit),
            "release" | "delete" => Ok(Operation::Release),
            other => Err(ZeropointError::validation(
                "operation",
                format!("unknown operation {other:?}"),
            )),
        }
    }
}

/// Status reported by a single command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Applied,
    Blocked,
    Failed,
}

/// Result of executing a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    pub status: CommandStatus,

    /// Why the command stopped short (blocked results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable failure (failed results).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Structured data produced by a successful apply, e.g. a resolved device path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl CommandResult {
    pub fn applied() -> Self {
        Self {
            status: CommandStatus::Applied,
            reason: None,
            error: None,
            output: None,
        }
    }

    pub fn applied_with(output: serde_json::Value) -> Self {
        Self {
            output: Some(output),
            ..Self::applied()
        }
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Blocked,
            reason: Some(reason.into()),
            error: None,
            output: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: CommandStatus::Failed,
            reason: None,
            error: Some(error.into()),
            output: None,
        }
    }

    pub fn is_applied(&self) -> bool {
        self.status == CommandStatus::Applied
    }
}

/// Externally visible outcome of one reconcile call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileResult {
    /// Intent converged and reality fast-forwarded to it.
    Applied,
    /// A reconciliation was started in the background.
    Running,
    /// Stopped at a recognized barrier, e.g. a pending reboot.
    Blocked,
    /// Another reconciliation is in flight; nothing was started.
    Waiting,
    /// Stopped on an error that needs investigation.
    Failed,
}

impl ReconcileResult {
    /// Returns true if the caller should simply try again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileResult::Blocked | ReconcileResult::Waiting)
    }
}

/// Why reconciliation was blocked, waiting or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockedReason {
    RebootRequired,
    CommandRunning,
    MissingDependency,
}

impl BlockedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockedReason::RebootRequired => "REBOOT_REQUIRED",
            BlockedReason::CommandRunning => "COMMAND_RUNNING",
            BlockedReason::MissingDependency => "MISSING_DEPENDENCY",
        }
    }
}

impl fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlockedReason {
    type Err = ZeropointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REBOOT_REQUIRED" => Ok(BlockedReason::RebootRequired),
            "COMMAND_RUNNING" => Ok(BlockedReason::CommandRunning),
            "MISSING_DEPENDENCY" => Ok(BlockedReason::MissingDependency),
            other => Err(ZeropointError::validation(
                "reason",
                format!("unknown blocked reason {other:?}"),
            )),
        }
    }
}

/// The resource or phase a reconcile failure is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileError {
    pub resource: String,
    pub message: String,
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

/// Response to a reconcile call, and the result of each phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub result: ReconcileResult,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BlockedReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReconcileError>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending_resources: Vec<String>,
}

impl ReconcileResponse {
    fn of(result: ReconcileResult) -> Self {
        Self {
            result,
            reason: None,
            error: None,
            pending_resources: Vec::new(),
        }
    }

    pub fn applied() -> Self {
        Self::of(ReconcileResult::Applied)
    }

    pub fn running() -> Self {
        Self::of(ReconcileResult::Running)
    }

    pub fn waiting() -> Self {
        Self {
            reason: Some(BlockedReason::CommandRunning),
            ..Self::of(ReconcileResult::Waiting)
        }
    }

    pub fn blocked(reason: BlockedReason, pending_resources: Vec<String>) -> Self {
        Self {
            reason: Some(reason),
            pending_resources,
            ..Self::of(ReconcileResult::Blocked)
        }
    }

    pub fn failed(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: Some(ReconcileError {
                resource: resource.into(),
                message: message.into(),
            }),
            ..Self::of(ReconcileResult::Failed)
        }
    }

    /// Attach a reason to a response.
    pub fn with_reason(mut self, reason: BlockedReason) -> Self {
        self.reason = Some(reason);
        self
    }

    pub fn is_applied(&self) -> bool {
        self.result == ReconcileResult::Applied
    }
}
