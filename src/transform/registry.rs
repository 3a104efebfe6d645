//! Transform records and the layered column model.
//!
//! Name resolution checks the `working` layer, then `derived`, then the
//! table's source columns. A working record shadows a derived record of the
//! same name without replacing it.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expression::ValueType;

/// Layer a transform record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    /// Persisted and replayed from the manifest.
    Derived,
    /// Session-local; shadows derived and source columns.
    Working,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Derived => write!(f, "derived"),
            Layer::Working => write!(f, "working"),
        }
    }
}

/// Definition of one derived or working column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRecord {
    pub column: String,
    pub expr: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub layer: Layer,
    /// Execution sequence number within the table.
    pub order: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl TransformRecord {
    pub fn new(
        column: impl Into<String>,
        expr: impl Into<String>,
        value_type: ValueType,
        layer: Layer,
        order: u64,
    ) -> Self {
        Self {
            column: column.into(),
            expr: expr.into(),
            value_type,
            layer,
            order,
            partition_by: None,
            filter: None,
        }
    }
}

/// Records of one table, one map per layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRegistry {
    derived: BTreeMap<String, TransformRecord>,
    working: BTreeMap<String, TransformRecord>,
    next_order: u64,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn layer_map(&self, layer: Layer) -> &BTreeMap<String, TransformRecord> {
        match layer {
            Layer::Derived => &self.derived,
            Layer::Working => &self.working,
        }
    }

    fn layer_map_mut(&mut self, layer: Layer) -> &mut BTreeMap<String, TransformRecord> {
        match layer {
            Layer::Derived => &mut self.derived,
            Layer::Working => &mut self.working,
        }
    }

    /// The effective record for `column`: working before derived.
    pub fn get(&self, column: &str) -> Option<&TransformRecord> {
        self.working
            .get(column)
            .or_else(|| self.derived.get(column))
    }

    /// The derived record, even while a working record shadows it.
    pub fn get_derived(&self, column: &str) -> Option<&TransformRecord> {
        self.derived.get(column)
    }

    pub fn get_layer(&self, column: &str, layer: Layer) -> Option<&TransformRecord> {
        self.layer_map(layer).get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Sequence number the next new record receives.
    pub fn next_order(&self) -> u64 {
        self.next_order
    }

    /// Insert or replace a record in its layer, returning the replaced one.
    pub fn upsert(&mut self, record: TransformRecord) -> Option<TransformRecord> {
        self.next_order = self.next_order.max(record.order.saturating_add(1));
        let column = record.column.clone();
        self.layer_map_mut(record.layer).insert(column, record)
    }

    pub fn remove(&mut self, column: &str, layer: Layer) -> Option<TransformRecord> {
        self.layer_map_mut(layer).remove(column)
    }

    /// Records of one layer, or of both, in execution order.
    pub fn list(&self, layer: Option<Layer>) -> Vec<&TransformRecord> {
        let mut records: Vec<&TransformRecord> = match layer {
            Some(layer) => self.layer_map(layer).values().collect(),
            None => self.derived.values().chain(self.working.values()).collect(),
        };
        records.sort_by_key(|r| (r.order, r.layer));
        records
    }

    /// Every record of both layers, shadowed ones included.
    pub fn all(&self) -> impl Iterator<Item = &TransformRecord> {
        self.derived.values().chain(self.working.values())
    }

    pub fn is_empty(&self) -> bool {
        self.derived.is_empty() && self.working.is_empty()
    }
}

/// Records of every table.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    tables: BTreeMap<String, TableRegistry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self, table: &str) -> Option<&TableRegistry> {
        self.tables.get(table)
    }

    pub fn table_mut(&mut self, table: &str) -> &mut TableRegistry {
        self.tables.entry(table.to_string()).or_default()
    }

    /// Replace a table's records wholesale.
    pub fn replace_table(&mut self, table: &str, records: TableRegistry) {
        self.tables.insert(table.to_string(), records);
    }

    /// Forget every record of `table`. Returns how many were removed.
    pub fn drop_table(&mut self, table: &str) -> usize {
        self.tables
            .remove(table)
            .map_or(0, |records| records.all().count())
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|(_, records)| !records.is_empty())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}
