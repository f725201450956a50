//! Branch names and status views.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zeropoint_core::{CommitId, Snapshot, ZeropointError};

/// A named cursor into the shared commit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Branch {
    /// Last state known to be applied to the host.
    Reality,
    /// Desired state being authored.
    Intent,
}

impl Branch {
    pub const ALL: [Branch; 2] = [Branch::Reality, Branch::Intent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Branch::Reality => "reality",
            Branch::Intent => "intent",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Branch {
    type Err = ZeropointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reality" | "main" => Ok(Branch::Reality),
            "intent" | "edit" => Ok(Branch::Intent),
            other => Err(ZeropointError::validation(
                "branch",
                format!("unknown branch {other:?}"),
            )),
        }
    }
}

/// A branch tip together with the snapshot it points at.
#[derive(Debug, Clone)]
pub struct BranchSnapshot {
    pub branch: Branch,
    pub commit: CommitId,
    pub snapshot: Snapshot,
}

/// How far `intent` is ahead of `reality`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatus {
    /// Commits on intent not yet on reality.
    pub ahead_count: usize,

    /// Short id of the newest unapplied commit.
    pub latest_commit: Option<String>,

    /// Message of the newest unapplied commit.
    pub latest_message: Option<String>,

    pub reality: CommitId,
    pub intent: CommitId,
}

impl BranchStatus {
    /// Returns true if reconciliation has outstanding work.
    pub fn has_pending(&self) -> bool {
        self.ahead_count > 0
    }
}
