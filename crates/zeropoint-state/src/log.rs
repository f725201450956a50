//! Append-only, content-addressed resource log.
//!
//! Every object is immutable and named by the SHA-256 of its bytes:
//! table documents are stored once and shared by every commit that
//! references them, commits point at their parent. The only mutable files
//! are the two branch refs, which are replaced atomically and only ever
//! name commits already present in the object store.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use zeropoint_core::{
    content_hash, table_document, CommitId, ResourceRow, ResourceTable, Result, Snapshot,
    ZeropointError,
};

use crate::atomic::atomic_write;
use crate::branch::Branch;

const OBJECTS_DIR: &str = "objects";
const REFS_DIR: &str = "refs";
const JOURNAL_FILE: &str = "journal.log";

/// The hashed part of a commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommitBody {
    parent: Option<CommitId>,
    message: String,
    timestamp: DateTime<Utc>,
    /// Table name -> hash of its export document.
    tables: BTreeMap<ResourceTable, String>,
}

/// An immutable, snapshot-advancing write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub parent: Option<CommitId>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    tables: BTreeMap<ResourceTable, String>,
}

impl Commit {
    pub fn short_id(&self) -> &str {
        self.id.short()
    }
}

/// Object store, branch refs and audit journal under one root directory.
#[derive(Debug)]
pub struct ResourceLog {
    root: PathBuf,
}

impl ResourceLog {
    /// Open (creating directories as needed) the log at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(REFS_DIR))?;
        Ok(Self { root })
    }

    /// Whether a history has been started.
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.head(Branch::Reality)?.is_some())
    }

    /// Current tip of `branch`, if the ref exists.
    pub fn head(&self, branch: Branch) -> Result<Option<CommitId>> {
        let path = self.ref_path(branch);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)?;
        CommitId::parse(&text).map(Some)
    }

    /// Tip of `branch`, failing if the ref is missing.
    pub fn require_head(&self, branch: Branch) -> Result<CommitId> {
        self.head(branch)?
            .ok_or_else(|| ZeropointError::storage(format!("branch {branch} has no commits")))
    }

    /// Point `branch` at `commit`. The commit must already be stored.
    pub fn set_head(&self, branch: Branch, commit: &CommitId) -> Result<()> {
        if !self.object_path(commit.as_str()).exists() {
            return Err(ZeropointError::UnknownCommit(commit.to_string()));
        }
        atomic_write(&self.ref_path(branch), format!("{commit}\n").as_bytes())?;
        self.journal(&format!("ref {branch} {commit}"))
    }

    /// Store a snapshot as a new commit on top of `parent`.
    ///
    /// Does not move any ref.
    pub fn write_commit(
        &self,
        parent: Option<&CommitId>,
        message: &str,
        snapshot: &Snapshot,
    ) -> Result<Commit> {
        let mut tables = BTreeMap::new();
        for table in ResourceTable::ALL {
            let document = serde_json::to_vec(&table_document(snapshot.rows(table)))?;
            tables.insert(table, self.put_object(&document)?);
        }

        let body = CommitBody {
            parent: parent.cloned(),
            message: message.to_string(),
            timestamp: Utc::now(),
            tables,
        };
        let bytes = serde_json::to_vec(&body)?;
        let id = CommitId::parse(&self.put_object(&bytes)?)?;

        self.journal(&format!("commit {id} {}", one_line(message)))?;

        Ok(Commit {
            id,
            parent: body.parent,
            message: body.message,
            timestamp: body.timestamp,
            tables: body.tables,
        })
    }

    /// Load a commit, verifying its content address.
    pub fn read_commit(&self, id: &CommitId) -> Result<Commit> {
        let bytes = self.get_object(id.as_str())?;
        let body: CommitBody = serde_json::from_slice(&bytes)
            .map_err(|e| ZeropointError::storage(format!("commit {id} is unreadable: {e}")))?;
        Ok(Commit {
            id: id.clone(),
            parent: body.parent,
            message: body.message,
            timestamp: body.timestamp,
            tables: body.tables,
        })
    }

    /// Rebuild the snapshot recorded by `commit`.
    pub fn read_snapshot(&self, commit: &Commit) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();
        for (table, hash) in &commit.tables {
            let document: serde_json::Value = serde_json::from_slice(&self.get_object(hash)?)?;
            snapshot.set_rows(*table, ResourceRow::list_from_value(*table, document)?);
        }
        Ok(snapshot)
    }

    /// Commits reachable from `from`, newest first.
    pub fn ancestry(&self, from: &CommitId, limit: Option<usize>) -> Result<Vec<Commit>> {
        let mut out = Vec::new();
        let mut cursor = Some(from.clone());
        while let Some(id) = cursor {
            if limit.is_some_and(|limit| out.len() >= limit) {
                break;
            }
            let commit = self.read_commit(&id)?;
            cursor = commit.parent.clone();
            out.push(commit);
        }
        Ok(out)
    }

    /// Whether `ancestor` is `descendant` or one of its parents.
    pub fn is_ancestor(&self, ancestor: &CommitId, descendant: &CommitId) -> Result<bool> {
        let mut cursor = Some(descendant.clone());
        while let Some(id) = cursor {
            if &id == ancestor {
                return Ok(true);
            }
            cursor = self.read_commit(&id)?.parent;
        }
        Ok(false)
    }

    /// Commits on `from`'s history strictly after `until`, newest first.
    ///
    /// Returns `None` if `until` is not reachable from `from`.
    pub fn commits_since(&self, from: &CommitId, until: &CommitId) -> Result<Option<Vec<Commit>>> {
        let mut out = Vec::new();
        let mut cursor = Some(from.clone());
        while let Some(id) = cursor {
            if &id == until {
                return Ok(Some(out));
            }
            let commit = self.read_commit(&id)?;
            cursor = commit.parent.clone();
            out.push(commit);
        }
        Ok(None)
    }

    /// Append a line to the audit journal.
    pub fn journal(&self, entry: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.root.join(JOURNAL_FILE))?;
        writeln!(file, "{} {}", Utc::now().to_rfc3339(), entry)?;
        Ok(())
    }

    fn put_object(&self, bytes: &[u8]) -> Result<String> {
        let hash = content_hash(bytes);
        let path = self.object_path(&hash);
        if !path.exists() {
            atomic_write(&path, bytes)?;
        }
        Ok(hash)
    }

    fn get_object(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.object_path(hash);
        let bytes = fs::read(&path).map_err(|e| {
            ZeropointError::storage(format!("object {hash} is missing: {e}"))
        })?;
        if content_hash(&bytes) != hash {
            return Err(ZeropointError::storage(format!("object {hash} is corrupt")));
        }
        Ok(bytes)
    }

    fn object_path(&self, hash: &str) -> PathBuf {
        self.root.join(OBJECTS_DIR).join(format!("{hash}.json"))
    }

    fn ref_path(&self, branch: Branch) -> PathBuf {
        self.root.join(REFS_DIR).join(branch.as_str())
    }
}

fn one_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}
