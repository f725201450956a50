//! Working checkouts: one materialized export directory per branch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use zeropoint_core::{
    table_document, CommitId, ResourceRow, ResourceTable, Result, Snapshot, ZeropointError,
};

use crate::atomic::{atomic_write, atomic_write_json};
use crate::branch::Branch;

/// Directory inside a checkout holding one export document per table.
pub const EXPORTS_DIR: &str = "exports";

const HEAD_FILE: &str = "HEAD";

/// A directory bound to one branch, holding that branch's export documents.
#[derive(Debug, Clone)]
pub struct Checkout {
    branch: Branch,
    dir: PathBuf,
}

impl Checkout {
    pub fn new(branch: Branch, dir: impl Into<PathBuf>) -> Self {
        Self {
            branch,
            dir: dir.into(),
        }
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a table's export document.
    pub fn export_path(&self, table: ResourceTable) -> PathBuf {
        self.dir.join(EXPORTS_DIR).join(table.export_file())
    }

    /// Commit this checkout was last materialized at.
    pub fn head(&self) -> Option<CommitId> {
        let text = fs::read_to_string(self.dir.join(HEAD_FILE)).ok()?;
        CommitId::parse(&text).ok()
    }

    pub fn set_head(&self, commit: &CommitId) -> Result<()> {
        atomic_write(&self.dir.join(HEAD_FILE), format!("{commit}\n").as_bytes())
    }

    /// Read every export document into a snapshot. Missing documents are empty tables.
    pub fn read_snapshot(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for table in ResourceTable::ALL {
            let path = self.export_path(table);
            if !path.exists() {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            let document: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
                ZeropointError::storage(format!("{} is unreadable: {e}", path.display()))
            })?;
            snapshot.set_rows(table, ResourceRow::list_from_value(table, document)?);
        }
        Ok(snapshot)
    }

    /// Atomically replace one table's export document.
    pub fn write_export(&self, table: ResourceTable, rows: &[ResourceRow]) -> Result<()> {
        atomic_write_json(&self.export_path(table), &table_document(rows))
    }

    /// Whether the checkout reflects exactly `commit` and its `snapshot`.
    pub fn is_current(&self, commit: &CommitId, snapshot: &Snapshot) -> bool {
        if self.head().as_ref() != Some(commit) {
            return false;
        }
        let exports_complete = ResourceTable::ALL
            .iter()
            .all(|table| self.export_path(*table).exists());
        exports_complete && self.read_snapshot().ok().as_ref() == Some(snapshot)
    }

    /// Throw away the directory and write `snapshot` out as `commit`.
    pub fn recreate(&self, commit: &CommitId, snapshot: &Snapshot) -> Result<()> {
        debug!("Recreating {} checkout at {}", self.branch, commit.short());
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        self.materialize(commit, snapshot)
    }

    /// Write every table of `snapshot` and record `commit` as the head.
    pub fn materialize(&self, commit: &CommitId, snapshot: &Snapshot) -> Result<()> {
        fs::create_dir_all(self.dir.join(EXPORTS_DIR))?;
        for table in ResourceTable::ALL {
            self.write_export(table, snapshot.rows(table))?;
        }
        self.set_head(commit)
    }
}
