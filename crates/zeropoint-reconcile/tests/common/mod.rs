//! Scripted in-memory host shared by the reconciliation tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;
use zeropoint_core::{
    CommandResult, Operation, ResourceRow, ResourceTable, Result, Snapshot, ZeropointError,
};
use zeropoint_reconcile::{
    Command, CommandContext, CommandRegistry, CommandRegistryBuilder, Executor, ExecutorConfig,
    Probe,
};
use zeropoint_state::{Branch, FileStateStore, StateStore, StoreConfig};

#[derive(Default)]
struct HostInner {
    state: Snapshot,
    calls: Vec<String>,
    probes: usize,
    staged: Vec<String>,
    failing: HashSet<String>,
    ignored: HashSet<String>,
    probe_broken: bool,
}

/// A fake host: commands mutate it, the probe reads it back.
///
/// Disk `add` only stages disks that carry a `partition`; those appear on
/// the host after [`ScriptedHost::reboot`]. Disks without one attach at once.
/// A reboot also brings up desired disks whose `add` never ran.
#[derive(Clone, Default)]
pub struct ScriptedHost {
    inner: Arc<Mutex<HostInner>>,
}

impl ScriptedHost {
    pub fn new(state: Snapshot) -> Self {
        let host = Self::default();
        host.inner.lock().unwrap().state = state;
        host
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.inner.lock().unwrap().calls.clear();
    }

    pub fn probe_count(&self) -> usize {
        self.inner.lock().unwrap().probes
    }

    pub fn state(&self) -> Snapshot {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn staged(&self) -> Vec<String> {
        self.inner.lock().unwrap().staged.clone()
    }

    /// Make every command on `key` fail.
    pub fn fail_on(&self, key: &str) {
        self.inner.lock().unwrap().failing.insert(key.to_string());
    }

    /// Make commands on `key` report success without changing anything.
    pub fn ignore(&self, key: &str) {
        self.inner.lock().unwrap().ignored.insert(key.to_string());
    }

    pub fn break_probe(&self) {
        self.inner.lock().unwrap().probe_broken = true;
    }

    /// Bring up every desired disk the host lacks, staged or not.
    pub fn reboot(&self, desired: &Snapshot) {
        let mut inner = self.inner.lock().unwrap();
        inner.staged.clear();
        let mut disks = inner.state.rows(ResourceTable::Disks).to_vec();
        for row in desired.rows(ResourceTable::Disks) {
            if !inner.state.contains(ResourceTable::Disks, row.id()) {
                disks.push(row.clone());
            }
        }
        inner.state.set_rows(ResourceTable::Disks, disks);
    }

    /// Register this host's commands for every table and operation.
    pub fn builder(&self) -> CommandRegistryBuilder {
        let mut builder = CommandRegistry::builder();
        for table in ResourceTable::ALL {
            for operation in [Operation::Add, Operation::Edit, Operation::Release] {
                builder = builder.register(
                    table,
                    operation,
                    Arc::new(HostCommand {
                        host: self.clone(),
                        operation,
                    }),
                );
            }
        }
        builder
    }

    pub fn registry(&self) -> CommandRegistry {
        self.builder().build()
    }

    fn execute(&self, operation: Operation, resource: &ResourceRow) -> CommandResult {
        let key = resource.key();
        let table = resource.table();
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(format!("{operation} {key}"));

        if inner.failing.contains(&key) {
            return CommandResult::failed(format!("{key} is busy"));
        }
        if inner.ignored.contains(&key) {
            return CommandResult::applied();
        }

        let mut rows: Vec<ResourceRow> = inner
            .state
            .rows(table)
            .iter()
            .filter(|row| row.id() != resource.id())
            .cloned()
            .collect();

        if let ResourceRow::Disk(disk) = resource {
            if operation == Operation::Add && disk.partition.is_some() {
                if !inner.staged.contains(&key) {
                    inner.staged.push(key);
                }
                return CommandResult::blocked("REBOOT_REQUIRED");
            }
        }

        if operation != Operation::Release {
            rows.push(resource.clone());
        }
        inner.state.set_rows(table, rows);

        match resource {
            ResourceRow::Disk(disk) => CommandResult::applied_with(json!({ "device": disk.device })),
            _ => CommandResult::applied(),
        }
    }
}

struct HostCommand {
    host: ScriptedHost,
    operation: Operation,
}

#[async_trait]
impl Command for HostCommand {
    fn name(&self) -> &str {
        self.operation.as_str()
    }

    async fn execute(&self, resource: &ResourceRow, _ctx: &CommandContext) -> CommandResult {
        self.host.execute(self.operation, resource)
    }
}

#[async_trait]
impl Probe for ScriptedHost {
    async fn probe(&self) -> Result<Snapshot> {
        let mut inner = self.inner.lock().unwrap();
        inner.probes += 1;
        if inner.probe_broken {
            return Err(ZeropointError::ProbeFailure("host unreachable".into()));
        }
        Ok(inner.state.clone())
    }
}

/// Wraps a command and parks it until released.
pub struct Hold {
    pub entered: Notify,
    pub release: Notify,
}

impl Hold {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Notify::new(),
        })
    }
}

pub struct HeldCommand {
    pub hold: Arc<Hold>,
    pub inner: Arc<dyn Command>,
}

#[async_trait]
impl Command for HeldCommand {
    fn name(&self) -> &str {
        "held"
    }

    async fn execute(&self, resource: &ResourceRow, ctx: &CommandContext) -> CommandResult {
        self.hold.entered.notify_one();
        self.hold.release.notified().await;
        self.inner.execute(resource, ctx).await
    }
}

pub struct PanickingCommand;

#[async_trait]
impl Command for PanickingCommand {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn execute(&self, _resource: &ResourceRow, _ctx: &CommandContext) -> CommandResult {
        panic!("module installer crashed")
    }
}

pub fn defaults() -> Value {
    json!({
        "disks": [{"id": "d1", "device": "/dev/sdb", "filesystem": "ext4"}]
    })
}

/// A store seeded with `defaults` under `dir`.
pub fn open_store(dir: &Path, defaults: &Value) -> Arc<FileStateStore> {
    let defaults_file = dir.join("defaults.json");
    std::fs::write(&defaults_file, defaults.to_string()).unwrap();
    Arc::new(FileStateStore::initialize(StoreConfig::new(dir.join("state"), defaults_file)).unwrap())
}

/// A host whose probed state equals reality.
pub async fn host_from_reality(store: &FileStateStore) -> ScriptedHost {
    let reality = store.snapshot(Branch::Reality).await.unwrap();
    ScriptedHost::new(zeropoint_reconcile::probed_tables(&reality.snapshot))
}

pub fn executor(
    store: Arc<FileStateStore>,
    host: &ScriptedHost,
    commands: CommandRegistry,
    config: ExecutorConfig,
) -> Executor {
    Executor::new(store, Arc::new(host.clone()), commands, config)
}

pub fn rows(table: ResourceTable, value: Value) -> Vec<ResourceRow> {
    ResourceRow::list_from_value(table, value).unwrap()
}

pub fn mount(id: &str, disk_id: &str) -> Value {
    json!({"id": id, "disk_id": disk_id, "mountpoint": format!("/mnt/{id}"), "options": "defaults"})
}
