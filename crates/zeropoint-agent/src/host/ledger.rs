//! Persisted record of what the agent has applied to this host.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use zeropoint_core::{DiskRow, ResourceRow, ResourceTable, Result, Snapshot, ZeropointError};
use zeropoint_reconcile::probed_tables;
use zeropoint_state::atomic::atomic_write_json;

/// Ledger file name inside the state directory.
pub const LEDGER_FILE: &str = "host.json";

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// A disk added behind a reboot gate, waiting for the next boot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedDisk {
    pub disk: DiskRow,
    /// Boot during which the disk was staged.
    pub boot_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    resources: serde_json::Value,
    #[serde(default)]
    staged: Vec<StagedDisk>,
    /// Boot the ledger was last written during.
    #[serde(default)]
    boot_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    present: Snapshot,
    staged: Vec<StagedDisk>,
}

/// Host resources as last applied by the agent's commands.
#[derive(Debug)]
pub struct HostLedger {
    path: PathBuf,
    boot_id: String,
    rebooted: bool,
    state: Mutex<LedgerState>,
}

impl HostLedger {
    /// Open the ledger at `path`, seeding it from `seed` if it does not exist.
    ///
    /// Disks staged during an earlier boot are promoted to present.
    pub fn open(path: impl Into<PathBuf>, seed: &Snapshot, boot_id: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let boot_id = boot_id.into();

        let (mut state, last_boot) = if path.exists() {
            load(&path)?
        } else {
            info!("Seeding host ledger at {} from reality", path.display());
            let state = LedgerState {
                present: probed_tables(seed),
                staged: Vec::new(),
            };
            (state, None)
        };
        let rebooted = last_boot.is_some_and(|last| last != boot_id);

        let (promoted, still_staged): (Vec<_>, Vec<_>) = state
            .staged
            .drain(..)
            .partition(|staged| staged.boot_id != boot_id);
        if !promoted.is_empty() {
            let mut disks = state.present.rows(ResourceTable::Disks).to_vec();
            for staged in promoted {
                info!(disk = %staged.disk.id, "Staged disk is present after reboot");
                disks.retain(|row| row.id() != staged.disk.id);
                disks.push(staged.disk.into());
            }
            state.present.set_rows(ResourceTable::Disks, disks);
        }
        state.staged = still_staged;

        let ledger = Self {
            path,
            boot_id,
            rebooted,
            state: Mutex::new(state),
        };
        ledger.persist(&ledger.lock())?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn boot_id(&self) -> &str {
        &self.boot_id
    }

    /// Whether the host booted since the ledger was last written.
    pub fn rebooted(&self) -> bool {
        self.rebooted
    }

    /// Resources currently recorded as present.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().present.clone()
    }

    pub fn get(&self, table: ResourceTable, id: &str) -> Option<ResourceRow> {
        self.lock().present.get(table, id).cloned()
    }

    pub fn staged(&self) -> Vec<StagedDisk> {
        self.lock().staged.clone()
    }

    pub fn is_staged(&self, id: &str) -> bool {
        self.lock().staged.iter().any(|staged| staged.disk.id == id)
    }

    /// Record `row` as present, replacing any row with the same id.
    pub fn upsert(&self, row: ResourceRow) -> Result<()> {
        let mut state = self.lock();
        let table = row.table();
        let mut rows: Vec<ResourceRow> = state
            .present
            .rows(table)
            .iter()
            .filter(|existing| existing.id() != row.id())
            .cloned()
            .collect();
        rows.push(row);
        state.present.set_rows(table, rows);
        self.persist(&state)
    }

    pub fn remove(&self, table: ResourceTable, id: &str) -> Result<()> {
        let mut state = self.lock();
        let rows: Vec<ResourceRow> = state
            .present
            .rows(table)
            .iter()
            .filter(|existing| existing.id() != id)
            .cloned()
            .collect();
        state.present.set_rows(table, rows);
        if table == ResourceTable::Disks {
            state.staged.retain(|staged| staged.disk.id != id);
        }
        self.persist(&state)
    }

    /// Record a disk that becomes present after the next reboot.
    pub fn stage_disk(&self, disk: DiskRow) -> Result<()> {
        let mut state = self.lock();
        state.staged.retain(|staged| staged.disk.id != disk.id);
        state.staged.push(StagedDisk {
            disk,
            boot_id: self.boot_id.clone(),
        });
        self.persist(&state)
    }

    /// Record disks brought up at boot: every one of `desired` not yet present or staged.
    ///
    /// Returns the ids that were attached.
    pub fn attach_new_disks<'a>(
        &self,
        desired: impl IntoIterator<Item = &'a DiskRow>,
    ) -> Result<Vec<String>> {
        let mut state = self.lock();
        let mut disks = state.present.rows(ResourceTable::Disks).to_vec();
        let mut attached = Vec::new();
        for disk in desired {
            let known = disks.iter().any(|row| row.id() == disk.id)
                || state.staged.iter().any(|staged| staged.disk.id == disk.id);
            if known {
                continue;
            }
            info!(disk = %disk.id, "Disk attached at boot");
            attached.push(disk.id.clone());
            disks.push(disk.clone().into());
        }
        if attached.is_empty() {
            return Ok(attached);
        }
        state.present.set_rows(ResourceTable::Disks, disks);
        self.persist(&state)?;
        Ok(attached)
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &LedgerState) -> Result<()> {
        let file = LedgerFile {
            resources: state.present.to_document(),
            staged: state.staged.clone(),
            boot_id: Some(self.boot_id.clone()),
        };
        atomic_write_json(&self.path, &serde_json::to_value(&file)?)
    }
}

fn load(path: &Path) -> Result<(LedgerState, Option<String>)> {
    let text = fs::read_to_string(path)?;
    let file: LedgerFile = serde_json::from_str(&text).map_err(|e| {
        ZeropointError::storage(format!("host ledger {} is unreadable: {e}", path.display()))
    })?;
    let present = if file.resources.is_null() {
        Snapshot::new()
    } else {
        Snapshot::from_document(file.resources)?
    };
    let state = LedgerState {
        present,
        staged: file.staged,
    };
    Ok((state, file.boot_id))
}

/// Identifier of the current boot.
///
/// Falls back to a random id per process where the kernel does not expose
/// one, so every restart counts as a reboot.
pub fn current_boot_id() -> String {
    match fs::read_to_string(BOOT_ID_PATH) {
        Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            warn!("{BOOT_ID_PATH} is unavailable; treating this process start as a new boot");
            Uuid::new_v4().to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zeropoint_core::VarRow;

    fn disk(id: &str) -> DiskRow {
        DiskRow {
            id: id.into(),
            device: format!("/dev/{id}"),
            partition: Some("gpt".into()),
            filesystem: Some("ext4".into()),
        }
    }

    #[test]
    fn test_seeded_from_probed_tables_only() {
        let dir = tempfile::tempdir().unwrap();
        let seed = Snapshot::new()
            .with_rows(ResourceTable::Disks, vec![disk("sdb").into()])
            .with_rows(
                ResourceTable::Vars,
                vec![ResourceRow::Var(VarRow {
                    id: "v".into(),
                    value: None,
                })],
            );

        let ledger = HostLedger::open(dir.path().join(LEDGER_FILE), &seed, "boot-1").unwrap();
        assert!(ledger.get(ResourceTable::Disks, "sdb").is_some());
        assert!(ledger.snapshot().rows(ResourceTable::Vars).is_empty());
        assert!(ledger.path().exists());
    }

    #[test]
    fn test_staged_disk_promoted_after_reboot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);

        let ledger = HostLedger::open(&path, &Snapshot::new(), "boot-1").unwrap();
        ledger.stage_disk(disk("sdc")).unwrap();
        assert!(ledger.is_staged("sdc"));
        drop(ledger);

        // Same boot: still staged.
        let ledger = HostLedger::open(&path, &Snapshot::new(), "boot-1").unwrap();
        assert!(ledger.is_staged("sdc"));
        assert!(ledger.get(ResourceTable::Disks, "sdc").is_none());
        drop(ledger);

        let ledger = HostLedger::open(&path, &Snapshot::new(), "boot-2").unwrap();
        assert!(!ledger.is_staged("sdc"));
        assert_eq!(
            ledger.get(ResourceTable::Disks, "sdc"),
            Some(ResourceRow::Disk(disk("sdc")))
        );
    }

    #[test]
    fn test_reboot_attaches_desired_disks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);

        let ledger = HostLedger::open(&path, &Snapshot::new(), "boot-1").unwrap();
        assert!(!ledger.rebooted());
        ledger.upsert(disk("sdb").into()).unwrap();
        ledger.stage_disk(disk("sdc")).unwrap();
        drop(ledger);

        let same_boot = HostLedger::open(&path, &Snapshot::new(), "boot-1").unwrap();
        assert!(!same_boot.rebooted());
        drop(same_boot);

        let ledger = HostLedger::open(&path, &Snapshot::new(), "boot-2").unwrap();
        assert!(ledger.rebooted());
        let desired = [disk("sdb"), disk("sdc"), disk("sde")];
        assert_eq!(ledger.attach_new_disks(&desired).unwrap(), vec!["sde".to_string()]);
        assert!(ledger.get(ResourceTable::Disks, "sde").is_some());
        assert!(ledger.attach_new_disks(&desired).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_and_remove_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE);

        let ledger = HostLedger::open(&path, &Snapshot::new(), "boot-1").unwrap();
        ledger.upsert(disk("sdb").into()).unwrap();
        ledger.upsert(disk("sdd").into()).unwrap();
        ledger.remove(ResourceTable::Disks, "sdb").unwrap();
        drop(ledger);

        let reopened = HostLedger::open(&path, &Snapshot::new(), "boot-1").unwrap();
        let disks = reopened.snapshot();
        assert_eq!(disks.rows(ResourceTable::Disks).len(), 1);
        assert!(disks.contains(ResourceTable::Disks, "sdd"));
    }
}
