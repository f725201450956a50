//! Relational query cache.
//!
//! A SQLite projection of one branch's snapshot into typed tables. It is
//! never the source of truth: every load clears and refills it from export
//! documents, and an unusable database file is simply thrown away.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use zeropoint_core::{ResourceRow, ResourceTable, Result, Snapshot, ZeropointError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Integer,
    Bool,
}

#[derive(Debug, Clone, Copy)]
struct Column {
    name: &'static str,
    kind: ColumnKind,
    required: bool,
}

const fn col(name: &'static str, kind: ColumnKind, required: bool) -> Column {
    Column {
        name,
        kind,
        required,
    }
}

use ColumnKind::{Bool, Integer, Text};

/// Column layout of each table. `id` is always first and the primary key.
fn columns(table: ResourceTable) -> &'static [Column] {
    const DISKS: &[Column] = &[
        col("id", Text, true),
        col("device", Text, true),
        col("partition", Text, false),
        col("filesystem", Text, false),
    ];
    const MOUNTS: &[Column] = &[
        col("id", Text, true),
        col("disk_id", Text, true),
        col("mountpoint", Text, true),
        col("options", Text, false),
    ];
    const PATHS: &[Column] = &[
        col("id", Text, true),
        col("mount_id", Text, true),
        col("path", Text, true),
        col("mode", Text, false),
    ];
    const VARS: &[Column] = &[col("id", Text, true), col("value", Text, false)];
    const MODULES: &[Column] = &[
        col("id", Text, true),
        col("source", Text, true),
        col("enabled", Bool, true),
    ];
    const LINKS: &[Column] = &[
        col("id", Text, true),
        col("from_module", Text, true),
        col("to_module", Text, true),
        col("bindings", Text, false),
    ];
    const EXPOSURES: &[Column] = &[
        col("id", Text, true),
        col("module", Text, true),
        col("protocol", Text, false),
        col("port", Integer, false),
        col("description", Text, false),
    ];

    match table {
        ResourceTable::Disks => DISKS,
        ResourceTable::Mounts => MOUNTS,
        ResourceTable::Paths => PATHS,
        ResourceTable::Vars => VARS,
        ResourceTable::Modules => MODULES,
        ResourceTable::Links => LINKS,
        ResourceTable::Exposures => EXPOSURES,
    }
}

fn create_sql(table: ResourceTable) -> String {
    let defs: Vec<String> = columns(table)
        .iter()
        .map(|c| {
            let ty = match c.kind {
                Text => "TEXT",
                Integer | Bool => "INTEGER",
            };
            if c.name == "id" {
                format!("{} {} PRIMARY KEY", c.name, ty)
            } else if c.required {
                format!("{} {} NOT NULL", c.name, ty)
            } else {
                format!("{} {}", c.name, ty)
            }
        })
        .collect();
    format!("CREATE TABLE {} ({})", table, defs.join(", "))
}

fn select_sql(table: ResourceTable) -> String {
    let names: Vec<&str> = columns(table).iter().map(|c| c.name).collect();
    format!("SELECT {} FROM {} ORDER BY id", names.join(", "), table)
}

fn insert_sql(table: ResourceTable) -> String {
    let cols = columns(table);
    let names: Vec<&str> = cols.iter().map(|c| c.name).collect();
    let slots: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        names.join(", "),
        slots.join(", ")
    )
}

fn sql(err: rusqlite::Error) -> ZeropointError {
    ZeropointError::Cache(err.to_string())
}

/// SQLite-backed projection of a snapshot.
pub struct RelationalCache {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for RelationalCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationalCache")
            .field("path", &self.path)
            .finish()
    }
}

impl RelationalCache {
    /// Open the cache at `path`, recreating its schema when absent or invalid.
    ///
    /// Returns the cache and whether it was (re)built empty, in which case the
    /// caller must load a snapshot into it.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, bool)> {
        let path = path.as_ref();
        match Self::open_checked(path) {
            Ok(opened) => Ok(opened),
            Err(err) => {
                warn!("Cache at {} is unusable ({}), recreating", path.display(), err);
                if path.exists() {
                    fs::remove_file(path)?;
                }
                Self::open_checked(path)
            }
        }
    }

    fn open_checked(path: &Path) -> Result<(Self, bool)> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path).map_err(sql)?;
        let mut cache = Self {
            conn,
            path: path.to_path_buf(),
        };

        if cache.is_valid() {
            return Ok((cache, false));
        }
        cache.reset_schema()?;
        Ok((cache, true))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every expected table exists and can be selected with the expected columns.
    pub fn is_valid(&self) -> bool {
        ResourceTable::ALL.iter().all(|table| {
            let exists = self
                .conn
                .query_row(
                    "SELECT COUNT(1) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table.as_str()],
                    |row| row.get::<_, i64>(0),
                )
                .map(|n| n == 1)
                .unwrap_or(false);
            exists && self.conn.prepare(&select_sql(*table)).is_ok()
        })
    }

    /// Drop every table and recreate the schema, empty.
    pub fn reset_schema(&mut self) -> Result<()> {
        debug!("Rebuilding cache schema at {}", self.path.display());
        let existing: Vec<String> = {
            let mut stmt = self
                .conn
                .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'")
                .map_err(sql)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(sql)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(sql)?;
            names
        };

        let tx = self.conn.transaction().map_err(sql)?;
        for name in existing {
            tx.execute(&format!("DROP TABLE IF EXISTS \"{}\"", name.replace('"', "")), [])
                .map_err(sql)?;
        }
        for table in ResourceTable::ALL {
            tx.execute(&create_sql(table), []).map_err(sql)?;
        }
        tx.commit().map_err(sql)
    }

    /// Replace the cache content with `snapshot`, atomically.
    pub fn load(&mut self, snapshot: &Snapshot) -> Result<()> {
        let tx = self.conn.transaction().map_err(sql)?;
        for table in ResourceTable::ALL {
            tx.execute(&format!("DELETE FROM {table}"), [])
                .map_err(sql)?;

            let insert = insert_sql(table);
            for row in snapshot.rows(table) {
                let values = to_sql_values(table, row);
                tx.execute(&insert, params_from_iter(values.iter()))
                    .map_err(sql)?;
            }
        }
        tx.commit().map_err(sql)
    }

    /// All rows of `table`, ordered by id.
    pub fn query(&self, table: ResourceTable) -> Result<Vec<ResourceRow>> {
        let cols = columns(table);
        let mut stmt = self.conn.prepare(&select_sql(table)).map_err(sql)?;
        let mut rows = stmt.query([]).map_err(sql)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(sql)? {
            let mut object = Map::new();
            for (i, column) in cols.iter().enumerate() {
                let value: SqlValue = row.get(i).map_err(sql)?;
                if let Some(json) = from_sql_value(column.kind, value) {
                    object.insert(column.name.to_string(), json);
                }
            }
            out.push(ResourceRow::from_value(table, Value::Object(object))?);
        }
        Ok(out)
    }

    /// Number of rows currently held for `table`.
    pub fn count(&self, table: ResourceTable) -> Result<usize> {
        self.conn
            .query_row(&format!("SELECT COUNT(1) FROM {table}"), [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n as usize)
            .map_err(sql)
    }
}

fn to_sql_values(table: ResourceTable, row: &ResourceRow) -> Vec<SqlValue> {
    let object = row.to_value();
    columns(table)
        .iter()
        .map(|column| match object.get(column.name) {
            Some(Value::String(s)) => SqlValue::Text(s.clone()),
            Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
            Some(Value::Number(n)) => n.as_i64().map(SqlValue::Integer).unwrap_or(SqlValue::Null),
            _ => SqlValue::Null,
        })
        .collect()
}

fn from_sql_value(kind: ColumnKind, value: SqlValue) -> Option<Value> {
    match (kind, value) {
        (_, SqlValue::Null) => None,
        (Bool, SqlValue::Integer(i)) => Some(Value::Bool(i != 0)),
        (_, SqlValue::Integer(i)) => Some(Value::from(i)),
        (_, SqlValue::Text(s)) => Some(Value::String(s)),
        (_, SqlValue::Real(f)) => Some(Value::from(f)),
        (_, SqlValue::Blob(_)) => None,
    }
}
