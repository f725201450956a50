//! State store implementations.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeropoint_core::{
    validate_rows, CommitId, ResourceRow, ResourceTable, Result, Snapshot, ZeropointError,
};

use crate::branch::{Branch, BranchSnapshot, BranchStatus};
use crate::cache::RelationalCache;
use crate::checkout::Checkout;
use crate::log::{Commit, ResourceLog};

/// Environment variable naming the defaults document used on first start.
pub const DEFAULTS_ENV: &str = "ZEROPOINT_STORE_DEFAULTS_FILE";

/// Message of the root commit.
pub const INITIAL_MESSAGE: &str = "Initialize state with defaults";

const CHECKOUTS_DIR: &str = "checkouts";
const CACHE_FILE: &str = "cache.db";

/// Where the store lives and how it is seeded.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root directory of the log, checkouts and cache.
    pub root: PathBuf,

    /// Defaults document, consumed only when no log exists yet.
    pub defaults_file: PathBuf,

    /// Cache database location (defaults to `<root>/cache.db`).
    pub cache_path: Option<PathBuf>,
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>, defaults_file: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            defaults_file: defaults_file.into(),
            cache_path: None,
        }
    }

    /// Place the cache database somewhere other than the store root.
    pub fn with_cache_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    fn cache_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| self.root.join(CACHE_FILE))
    }
}

/// The query and mutation surface over intent and reality.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// All rows of `table` on the intent branch, ordered by id.
    async fn get_desired(&self, table: ResourceTable) -> Result<Vec<ResourceRow>>;

    /// All rows of `table` on the reality branch, ordered by id.
    async fn get_actual(&self, table: ResourceTable) -> Result<Vec<ResourceRow>>;

    /// A branch tip and the full snapshot it records, read consistently.
    async fn snapshot(&self, branch: Branch) -> Result<BranchSnapshot>;

    /// Replace `table` on intent with `rows` and commit. Returns the new commit.
    async fn write_intent(
        &self,
        table: ResourceTable,
        rows: Vec<ResourceRow>,
        message: &str,
    ) -> Result<CommitId>;

    /// Fast-forward reality to the intent commit named by `commit`.
    async fn merge_to_main(&self, commit: &str) -> Result<CommitId>;

    /// How far intent is ahead of reality.
    async fn status(&self) -> Result<BranchStatus>;

    /// Commits on `branch`, newest first.
    async fn history(&self, branch: Branch, limit: Option<usize>) -> Result<Vec<Commit>>;
}

/// Filesystem-backed state store: resource log, one checkout per branch and
/// a relational cache, all under one root.
pub struct FileStateStore {
    config: StoreConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    log: ResourceLog,
    reality: Checkout,
    intent: Checkout,
    cache: RelationalCache,
}

impl FileStateStore {
    /// Open the store, creating it from the defaults document if needed.
    ///
    /// Idempotent: an existing log is reused, stale or missing checkouts are
    /// recreated, and the cache is rebuilt if it is absent or invalid.
    pub fn initialize(config: StoreConfig) -> Result<Self> {
        info!("Initializing state store at {}", config.root.display());
        fs::create_dir_all(&config.root)?;

        let log = ResourceLog::open(&config.root)?;
        if !log.is_initialized()? {
            let defaults = read_defaults(&config.defaults_file)?;
            let root = log.write_commit(None, INITIAL_MESSAGE, &defaults)?;
            log.set_head(Branch::Reality, &root.id)?;
            info!("Created state log at {} from defaults", root.id.short());
        }

        let reality_head = log.require_head(Branch::Reality)?;
        if log.head(Branch::Intent)?.is_none() {
            log.set_head(Branch::Intent, &reality_head)?;
            debug!("Created intent branch from reality");
        }
        let intent_head = log.require_head(Branch::Intent)?;

        if !log.is_ancestor(&reality_head, &intent_head)? {
            return Err(ZeropointError::Divergence {
                reality: reality_head.to_string(),
                target: intent_head.to_string(),
            });
        }

        let checkouts = config.root.join(CHECKOUTS_DIR);
        let reality = Checkout::new(Branch::Reality, checkouts.join(Branch::Reality.as_str()));
        let intent = Checkout::new(Branch::Intent, checkouts.join(Branch::Intent.as_str()));

        let reality_snapshot = log.read_snapshot(&log.read_commit(&reality_head)?)?;
        for (checkout, head) in [(&reality, &reality_head), (&intent, &intent_head)] {
            let snapshot = log.read_snapshot(&log.read_commit(head)?)?;
            if !checkout.is_current(head, &snapshot) {
                checkout.recreate(head, &snapshot)?;
            }
        }

        let (mut cache, rebuilt) = RelationalCache::open(config.cache_path())?;
        if rebuilt {
            info!("Rebuilding relational cache from reality");
            cache.load(&reality_snapshot)?;
        }

        Ok(Self {
            config,
            inner: Mutex::new(Inner {
                log,
                reality,
                intent,
                cache,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Reload the cache from reality.
    pub async fn rebuild_cache(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.cache.reset_schema()?;
        let snapshot = inner.reality.read_snapshot()?;
        inner.cache.load(&snapshot)
    }
}

impl Inner {
    fn checkout(&self, branch: Branch) -> &Checkout {
        match branch {
            Branch::Reality => &self.reality,
            Branch::Intent => &self.intent,
        }
    }

    /// Re-sync the cache from a branch export, then query it.
    ///
    /// A checkout left behind its ref by an interrupted write is rebuilt first.
    fn read_table(&mut self, branch: Branch, table: ResourceTable) -> Result<Vec<ResourceRow>> {
        let head = self.log.require_head(branch)?;
        if self.checkout(branch).head().as_ref() != Some(&head) {
            warn!("{branch} checkout is behind {}; recreating", head.short());
            let (head, snapshot) = self.head_snapshot(branch)?;
            self.checkout(branch).recreate(&head, &snapshot)?;
        }
        let snapshot = self.checkout(branch).read_snapshot()?;
        self.cache.load(&snapshot)?;
        self.cache.query(table)
    }

    fn head_snapshot(&self, branch: Branch) -> Result<(CommitId, Snapshot)> {
        let head = self.log.require_head(branch)?;
        let snapshot = self.log.read_snapshot(&self.log.read_commit(&head)?)?;
        Ok((head, snapshot))
    }

    /// Find the intent commit named by a full id or unambiguous prefix.
    fn resolve_intent_commit(&self, reference: &str) -> Result<CommitId> {
        let intent_head = self.log.require_head(Branch::Intent)?;
        let matches: Vec<CommitId> = self
            .log
            .ancestry(&intent_head, None)?
            .into_iter()
            .map(|commit| commit.id)
            .filter(|id| id.matches(reference))
            .collect();

        match matches.as_slice() {
            [id] => Ok(id.clone()),
            [] => Err(ZeropointError::UnknownCommit(reference.to_string())),
            _ => Err(ZeropointError::UnknownCommit(format!(
                "{reference} is ambiguous"
            ))),
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_desired(&self, table: ResourceTable) -> Result<Vec<ResourceRow>> {
        self.inner.lock().await.read_table(Branch::Intent, table)
    }

    async fn get_actual(&self, table: ResourceTable) -> Result<Vec<ResourceRow>> {
        self.inner.lock().await.read_table(Branch::Reality, table)
    }

    async fn snapshot(&self, branch: Branch) -> Result<BranchSnapshot> {
        let inner = self.inner.lock().await;
        let (commit, snapshot) = inner.head_snapshot(branch)?;
        Ok(BranchSnapshot {
            branch,
            commit,
            snapshot,
        })
    }

    async fn write_intent(
        &self,
        table: ResourceTable,
        rows: Vec<ResourceRow>,
        message: &str,
    ) -> Result<CommitId> {
        validate_rows(table, &rows)?;
        let message = if message.trim().is_empty() {
            format!("Update {table}")
        } else {
            message.to_string()
        };

        let inner = self.inner.lock().await;
        let (parent, mut snapshot) = inner.head_snapshot(Branch::Intent)?;
        snapshot.set_rows(table, rows);

        let commit = inner.log.write_commit(Some(&parent), &message, &snapshot)?;
        inner.log.set_head(Branch::Intent, &commit.id)?;
        inner.intent.write_export(table, snapshot.rows(table))?;
        inner.intent.set_head(&commit.id)?;

        info!("Committed {} on intent: {}", commit.id.short(), message);
        Ok(commit.id)
    }

    async fn merge_to_main(&self, commit: &str) -> Result<CommitId> {
        let inner = self.inner.lock().await;
        let target = inner.resolve_intent_commit(commit)?;
        let reality = inner.log.require_head(Branch::Reality)?;

        if inner.log.is_ancestor(&target, &reality)? {
            debug!("Reality already contains {}", target.short());
            return Ok(reality);
        }
        if !inner.log.is_ancestor(&reality, &target)? {
            warn!(
                "Refusing to merge {}: reality {} is not on its history",
                target.short(),
                reality.short()
            );
            return Err(ZeropointError::Divergence {
                reality: reality.to_string(),
                target: target.to_string(),
            });
        }

        let snapshot = inner.log.read_snapshot(&inner.log.read_commit(&target)?)?;
        inner.log.set_head(Branch::Reality, &target)?;
        inner.reality.materialize(&target, &snapshot)?;

        info!("Fast-forwarded reality {} -> {}", reality.short(), target.short());
        Ok(target)
    }

    async fn status(&self) -> Result<BranchStatus> {
        let inner = self.inner.lock().await;
        let reality = inner.log.require_head(Branch::Reality)?;
        let intent = inner.log.require_head(Branch::Intent)?;

        let ahead = inner
            .log
            .commits_since(&intent, &reality)?
            .ok_or_else(|| ZeropointError::Divergence {
                reality: reality.to_string(),
                target: intent.to_string(),
            })?;

        let latest = ahead.first();
        Ok(BranchStatus {
            ahead_count: ahead.len(),
            latest_commit: latest.map(|c| c.short_id().to_string()),
            latest_message: latest.map(|c| c.message.trim().to_string()),
            reality,
            intent,
        })
    }

    async fn history(&self, branch: Branch, limit: Option<usize>) -> Result<Vec<Commit>> {
        let inner = self.inner.lock().await;
        let head = inner.log.require_head(branch)?;
        inner.log.ancestry(&head, limit)
    }
}

fn read_defaults(path: &Path) -> Result<Snapshot> {
    if !path.exists() {
        return Err(ZeropointError::Initialization(format!(
            "store not found and defaults file missing. Expected: {}. \
             Set {}=/path/to/defaults.json or create {}",
            path.display(),
            DEFAULTS_ENV,
            path.display()
        )));
    }

    let text = fs::read_to_string(path)?;
    let document: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        ZeropointError::Initialization(format!("defaults file {} is not JSON: {e}", path.display()))
    })?;
    Snapshot::from_document(document).map_err(|e| {
        ZeropointError::Initialization(format!("defaults file {} is invalid: {e}", path.display()))
    })
}
