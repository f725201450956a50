//! Full-state snapshots.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{Result, ZeropointError};
use crate::resource::{Resource, ResourceRow, ResourceTable};

/// The full set of resource tables at one point in history.
///
/// Rows inside a table are kept ordered by id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    tables: BTreeMap<ResourceTable, Vec<ResourceRow>>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            tables: ResourceTable::ALL.into_iter().map(|t| (t, Vec::new())).collect(),
        }
    }
}

impl Snapshot {
    /// Create a snapshot with every table empty.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the rows of a table.
    pub fn rows(&self, table: ResourceTable) -> &[ResourceRow] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Replace a table's rows.
    pub fn set_rows(&mut self, table: ResourceTable, mut rows: Vec<ResourceRow>) {
        rows.sort_by(|a, b| a.id().cmp(b.id()));
        self.tables.insert(table, rows);
    }

    /// Builder-style variant of [`Snapshot::set_rows`].
    pub fn with_rows(mut self, table: ResourceTable, rows: Vec<ResourceRow>) -> Self {
        self.set_rows(table, rows);
        self
    }

    pub fn get(&self, table: ResourceTable, id: &str) -> Option<&ResourceRow> {
        self.rows(table).iter().find(|row| row.id() == id)
    }

    pub fn contains(&self, table: ResourceTable, id: &str) -> bool {
        self.get(table, id).is_some()
    }

    /// Iterate the typed rows of `R`'s table.
    pub fn typed<'a, R: Resource + 'a>(&'a self) -> impl Iterator<Item = &'a R> {
        self.rows(R::TABLE).iter().filter_map(R::from_row)
    }

    /// Parse a document of the form `{"disks": [...], "mounts": [...]}`.
    ///
    /// Tables absent from the document are empty.
    pub fn from_document(document: Value) -> Result<Self> {
        let Value::Object(map) = document else {
            return Err(ZeropointError::Serialization(
                "snapshot document must be an object keyed by table".to_string(),
            ));
        };

        let mut snapshot = Snapshot::new();
        for (name, rows) in map {
            let table: ResourceTable = name.parse()?;
            snapshot.set_rows(table, ResourceRow::list_from_value(table, rows)?);
        }
        Ok(snapshot)
    }

    /// Render the snapshot as a document keyed by table, every table included.
    pub fn to_document(&self) -> Value {
        let mut map = Map::new();
        for table in ResourceTable::ALL {
            map.insert(table.as_str().to_string(), table_document(self.rows(table)));
        }
        Value::Object(map)
    }
}

/// Render one table's export document: a list of flat row objects.
pub fn table_document(rows: &[ResourceRow]) -> Value {
    Value::Array(rows.iter().map(ResourceRow::to_value).collect())
}
