//! Resource tables and the typed rows they hold.
//!
//! Rows are plain data. Each table is exported as a JSON array of flat row
//! objects, so the serde shape of every row struct is the on-disk shape.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZeropointError};

/// One of the resource tables tracked by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceTable {
    Disks,
    Mounts,
    Paths,
    Vars,
    Modules,
    Links,
    Exposures,
}

impl ResourceTable {
    /// Every table, in storage dependency order.
    pub const ALL: [ResourceTable; 7] = [
        ResourceTable::Disks,
        ResourceTable::Mounts,
        ResourceTable::Paths,
        ResourceTable::Vars,
        ResourceTable::Modules,
        ResourceTable::Links,
        ResourceTable::Exposures,
    ];

    /// Tables a host probe reports on.
    pub const PROBED: [ResourceTable; 5] = [
        ResourceTable::Disks,
        ResourceTable::Mounts,
        ResourceTable::Paths,
        ResourceTable::Modules,
        ResourceTable::Exposures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceTable::Disks => "disks",
            ResourceTable::Mounts => "mounts",
            ResourceTable::Paths => "paths",
            ResourceTable::Vars => "vars",
            ResourceTable::Modules => "modules",
            ResourceTable::Links => "links",
            ResourceTable::Exposures => "exposures",
        }
    }

    /// Singular name, as used in `${path:id}` references.
    pub fn singular(&self) -> &'static str {
        match self {
            ResourceTable::Disks => "disk",
            ResourceTable::Mounts => "mount",
            ResourceTable::Paths => "path",
            ResourceTable::Vars => "var",
            ResourceTable::Modules => "module",
            ResourceTable::Links => "link",
            ResourceTable::Exposures => "exposure",
        }
    }

    /// File name of this table's export document.
    pub fn export_file(&self) -> String {
        format!("{}.json", self.as_str())
    }

    /// Parse either the plural table name or its singular form.
    pub fn from_reference(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == name || t.singular() == name)
    }
}

impl fmt::Display for ResourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceTable {
    type Err = ZeropointError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ZeropointError::UnknownTable(s.to_string()))
    }
}

/// A block device the host should carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskRow {
    pub id: String,
    pub device: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountRow {
    pub id: String,
    pub disk_id: String,
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<String>,
}

/// A directory living on a mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathRow {
    pub id: String,
    pub mount_id: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

impl PathRow {
    pub const DEFAULT_MODE: &'static str = "0755";

    pub fn mode_or_default(&self) -> &str {
        self.mode.as_deref().unwrap_or(Self::DEFAULT_MODE)
    }
}

/// A named value that may reference other vars or resources via `${...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarRow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleRow {
    pub id: String,
    pub source: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// A binding between two modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LinkRow {
    pub id: String,
    pub from_module: String,
    pub to_module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bindings: Option<String>,
}

/// Network-facing configuration for a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExposureRow {
    pub id: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A row of any table.
///
/// Serializes untagged, so the JSON form is exactly the inner row. Parsing
/// needs the table name, see [`ResourceRow::from_value`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ResourceRow {
    Disk(DiskRow),
    Mount(MountRow),
    Path(PathRow),
    Var(VarRow),
    Module(ModuleRow),
    Link(LinkRow),
    Exposure(ExposureRow),
}

/// Typed access to one table's rows.
pub trait Resource: Serialize + DeserializeOwned + Clone + PartialEq + Into<ResourceRow> {
    const TABLE: ResourceTable;

    fn id(&self) -> &str;

    fn from_row(row: &ResourceRow) -> Option<&Self>;
}

macro_rules! impl_resource {
    ($row:ty, $variant:ident, $table:ident) => {
        impl Resource for $row {
            const TABLE: ResourceTable = ResourceTable::$table;

            fn id(&self) -> &str {
                &self.id
            }

            fn from_row(row: &ResourceRow) -> Option<&Self> {
                match row {
                    ResourceRow::$variant(inner) => Some(inner),
                    _ => None,
                }
            }
        }

        impl From<$row> for ResourceRow {
            fn from(row: $row) -> Self {
                ResourceRow::$variant(row)
            }
        }
    };
}

impl_resource!(DiskRow, Disk, Disks);
impl_resource!(MountRow, Mount, Mounts);
impl_resource!(PathRow, Path, Paths);
impl_resource!(VarRow, Var, Vars);
impl_resource!(ModuleRow, Module, Modules);
impl_resource!(LinkRow, Link, Links);
impl_resource!(ExposureRow, Exposure, Exposures);

fn parse<R: Resource>(value: serde_json::Value) -> Result<ResourceRow> {
    serde_json::from_value::<R>(value)
        .map(Into::into)
        .map_err(|e| ZeropointError::validation(R::TABLE.as_str(), e.to_string()))
}

impl ResourceRow {
    /// Parse a flat row object belonging to `table`.
    pub fn from_value(table: ResourceTable, value: serde_json::Value) -> Result<Self> {
        match table {
            ResourceTable::Disks => parse::<DiskRow>(value),
            ResourceTable::Mounts => parse::<MountRow>(value),
            ResourceTable::Paths => parse::<PathRow>(value),
            ResourceTable::Vars => parse::<VarRow>(value),
            ResourceTable::Modules => parse::<ModuleRow>(value),
            ResourceTable::Links => parse::<LinkRow>(value),
            ResourceTable::Exposures => parse::<ExposureRow>(value),
        }
    }

    /// Parse a JSON array of rows belonging to `table`.
    pub fn list_from_value(table: ResourceTable, value: serde_json::Value) -> Result<Vec<Self>> {
        match value {
            serde_json::Value::Array(items) => items
                .into_iter()
                .map(|item| Self::from_value(table, item))
                .collect(),
            serde_json::Value::Null => Ok(Vec::new()),
            other => Err(ZeropointError::validation(
                table.as_str(),
                format!("expected a list of rows, got {}", json_kind(&other)),
            )),
        }
    }

    pub fn table(&self) -> ResourceTable {
        match self {
            ResourceRow::Disk(_) => ResourceTable::Disks,
            ResourceRow::Mount(_) => ResourceTable::Mounts,
            ResourceRow::Path(_) => ResourceTable::Paths,
            ResourceRow::Var(_) => ResourceTable::Vars,
            ResourceRow::Module(_) => ResourceTable::Modules,
            ResourceRow::Link(_) => ResourceTable::Links,
            ResourceRow::Exposure(_) => ResourceTable::Exposures,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ResourceRow::Disk(r) => &r.id,
            ResourceRow::Mount(r) => &r.id,
            ResourceRow::Path(r) => &r.id,
            ResourceRow::Var(r) => &r.id,
            ResourceRow::Module(r) => &r.id,
            ResourceRow::Link(r) => &r.id,
            ResourceRow::Exposure(r) => &r.id,
        }
    }

    /// `table:id`, the name used in logs and reconcile errors.
    pub fn key(&self) -> String {
        resource_key(self.table(), self.id())
    }

    pub fn to_value(&self) -> serde_json::Value {
        // Row structs only hold strings, integers and bools.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Borrow the typed row if it belongs to `R`'s table.
    pub fn as_typed<R: Resource>(&self) -> Option<&R> {
        R::from_row(self)
    }
}

/// Format the `table:id` key of a resource.
pub fn resource_key(table: ResourceTable, id: &str) -> String {
    format!("{}:{}", table, id)
}

/// Check that `rows` all belong to `table` and carry unique, non-empty ids.
pub fn validate_rows(table: ResourceTable, rows: &[ResourceRow]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for row in rows {
        if row.table() != table {
            return Err(ZeropointError::validation(
                table.as_str(),
                format!("row {} belongs to table {}", row.id(), row.table()),
            ));
        }
        if row.id().trim().is_empty() {
            return Err(ZeropointError::validation(table.as_str(), "row id cannot be empty"));
        }
        if !seen.insert(row.id()) {
            return Err(ZeropointError::validation(
                table.as_str(),
                format!("duplicate id {}", row.id()),
            ));
        }
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "a list",
        serde_json::Value::Object(_) => "an object",
    }
}
