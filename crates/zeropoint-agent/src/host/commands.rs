//! Host-backed commands.
//!
//! Paths and mountpoints are real directories; everything else is recorded
//! in the [`HostLedger`]. Every command updates the ledger only once it is
//! about to report `applied`, so a failure leaves the ledger untouched.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use zeropoint_core::{
    CommandResult, DiskRow, MountRow, Operation, PathRow, ResourceRow, ResourceTable,
};
use zeropoint_reconcile::{Command, CommandContext, CommandRegistry};

use super::ledger::HostLedger;

const OPERATIONS: [Operation; 3] = [Operation::Add, Operation::Edit, Operation::Release];

/// Build the registry of host commands for every table and operation.
pub fn registry(ledger: Arc<HostLedger>) -> CommandRegistry {
    let mut builder = CommandRegistry::builder();
    for operation in OPERATIONS {
        builder = builder
            .register(
                ResourceTable::Disks,
                operation,
                Arc::new(DiskCommand {
                    ledger: ledger.clone(),
                    operation,
                }),
            )
            .register(
                ResourceTable::Mounts,
                operation,
                Arc::new(MountCommand {
                    ledger: ledger.clone(),
                    operation,
                }),
            )
            .register(
                ResourceTable::Paths,
                operation,
                Arc::new(PathCommand {
                    ledger: ledger.clone(),
                    operation,
                }),
            );
        for table in [
            ResourceTable::Modules,
            ResourceTable::Links,
            ResourceTable::Exposures,
        ] {
            builder = builder.register(
                table,
                operation,
                Arc::new(RecordCommand {
                    ledger: ledger.clone(),
                    operation,
                }),
            );
        }
    }
    builder.build()
}

fn record(ledger: &HostLedger, row: &ResourceRow) -> CommandResult {
    match ledger.upsert(row.clone()) {
        Ok(()) => CommandResult::applied(),
        Err(e) => CommandResult::failed(format!("cannot record {}: {e}", row.key())),
    }
}

fn forget(ledger: &HostLedger, row: &ResourceRow) -> CommandResult {
    match ledger.remove(row.table(), row.id()) {
        Ok(()) => CommandResult::applied(),
        Err(e) => CommandResult::failed(format!("cannot forget {}: {e}", row.key())),
    }
}

fn wrong_table(name: &str, row: &ResourceRow) -> CommandResult {
    CommandResult::failed(format!("{name} cannot handle {}", row.key()))
}

/// Disks: `add` stages partitioned disks for the next boot and attaches
/// whole disks at once; `release` refuses while a mount uses the disk.
struct DiskCommand {
    ledger: Arc<HostLedger>,
    operation: Operation,
}

impl DiskCommand {
    fn add(&self, disk: &DiskRow) -> CommandResult {
        let row = ResourceRow::Disk(disk.clone());
        if self.ledger.get(ResourceTable::Disks, &disk.id).as_ref() == Some(&row) {
            return CommandResult::applied_with(json!({ "device": disk.device }));
        }
        if disk.partition.is_some() {
            if !self.ledger.is_staged(&disk.id) {
                if let Err(e) = self.ledger.stage_disk(disk.clone()) {
                    return CommandResult::failed(format!("cannot stage disk {}: {e}", disk.id));
                }
            }
            return CommandResult::blocked("REBOOT_REQUIRED");
        }
        match self.ledger.upsert(row) {
            Ok(()) => CommandResult::applied_with(json!({ "device": disk.device })),
            Err(e) => CommandResult::failed(format!("cannot record disk {}: {e}", disk.id)),
        }
    }

    fn release(&self, disk: &DiskRow) -> CommandResult {
        let mounted = self
            .ledger
            .snapshot()
            .typed::<MountRow>()
            .find(|mount| mount.disk_id == disk.id)
            .map(|mount| mount.mountpoint.clone());
        if let Some(mountpoint) = mounted {
            return CommandResult::failed(format!(
                "disk {} is still mounted at {mountpoint}",
                disk.id
            ));
        }
        forget(&self.ledger, &ResourceRow::Disk(disk.clone()))
    }
}

#[async_trait]
impl Command for DiskCommand {
    fn name(&self) -> &str {
        "disk"
    }

    async fn execute(&self, resource: &ResourceRow, _ctx: &CommandContext) -> CommandResult {
        let ResourceRow::Disk(disk) = resource else {
            return wrong_table(self.name(), resource);
        };
        match self.operation {
            Operation::Add => self.add(disk),
            Operation::Edit => record(&self.ledger, resource),
            Operation::Release => self.release(disk),
        }
    }
}

/// Mounts: ensure the mountpoint directory exists, then record the mount.
struct MountCommand {
    ledger: Arc<HostLedger>,
    operation: Operation,
}

#[async_trait]
impl Command for MountCommand {
    fn name(&self) -> &str {
        "mount"
    }

    async fn execute(&self, resource: &ResourceRow, _ctx: &CommandContext) -> CommandResult {
        let ResourceRow::Mount(mount) = resource else {
            return wrong_table(self.name(), resource);
        };

        if self.operation == Operation::Release {
            let busy = self
                .ledger
                .snapshot()
                .typed::<PathRow>()
                .find(|path| path.mount_id == mount.id)
                .map(|path| path.path.clone());
            if let Some(path) = busy {
                return CommandResult::failed(format!(
                    "mount {} still holds path {path}",
                    mount.id
                ));
            }
            return forget(&self.ledger, resource);
        }

        if let Err(e) = fs::create_dir_all(&mount.mountpoint) {
            return CommandResult::failed(format!(
                "cannot create mountpoint {}: {e}",
                mount.mountpoint
            ));
        }
        record(&self.ledger, resource)
    }
}

/// Paths: create with mode, chmod on edit, remove only when empty.
struct PathCommand {
    ledger: Arc<HostLedger>,
    operation: Operation,
}

impl PathCommand {
    fn ensure(&self, path: &PathRow) -> CommandResult {
        let mode = match parse_mode(path.mode_or_default()) {
            Ok(mode) => mode,
            Err(message) => return CommandResult::failed(message),
        };
        if let Err(e) = fs::create_dir_all(&path.path) {
            return CommandResult::failed(format!("cannot create {}: {e}", path.path));
        }
        if let Err(e) = set_mode(Path::new(&path.path), mode) {
            return CommandResult::failed(format!("cannot chmod {}: {e}", path.path));
        }
        record(&self.ledger, &ResourceRow::Path(path.clone()))
    }

    fn remove(&self, path: &PathRow) -> CommandResult {
        match fs::remove_dir(&path.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                let empty = fs::read_dir(&path.path)
                    .map(|mut entries| entries.next().is_none())
                    .unwrap_or(false);
                let message = if empty {
                    format!("cannot remove {}: {e}", path.path)
                } else {
                    format!("{} is not empty", path.path)
                };
                return CommandResult::failed(message);
            }
        }
        forget(&self.ledger, &ResourceRow::Path(path.clone()))
    }
}

#[async_trait]
impl Command for PathCommand {
    fn name(&self) -> &str {
        "path"
    }

    async fn execute(&self, resource: &ResourceRow, _ctx: &CommandContext) -> CommandResult {
        let ResourceRow::Path(path) = resource else {
            return wrong_table(self.name(), resource);
        };
        match self.operation {
            Operation::Add | Operation::Edit => self.ensure(path),
            Operation::Release => self.remove(path),
        }
    }
}

/// Modules, links and exposures are recorded as applied.
struct RecordCommand {
    ledger: Arc<HostLedger>,
    operation: Operation,
}

#[async_trait]
impl Command for RecordCommand {
    fn name(&self) -> &str {
        "record"
    }

    async fn execute(&self, resource: &ResourceRow, _ctx: &CommandContext) -> CommandResult {
        match self.operation {
            Operation::Add | Operation::Edit => record(&self.ledger, resource),
            Operation::Release => forget(&self.ledger, resource),
        }
    }
}

fn parse_mode(mode: &str) -> Result<u32, String> {
    u32::from_str_radix(mode.trim_start_matches("0o"), 8)
        .ok()
        .filter(|mode| *mode <= 0o7777)
        .ok_or_else(|| format!("invalid mode {mode:?}"))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}
