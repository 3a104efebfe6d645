use std::collections::BTreeMap;

use tracing::debug;

use super::Storage;
use crate::error::{PrismError, Result};
use crate::schema::{Schema, SchemaProvider, Table};
use crate::value::{ResultSet, Row, Value};

#[derive(Debug, Clone, Default, PartialEq)]
struct MemoryTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// In-memory tables.
///
/// Transactions snapshot every table on `begin` and restore the snapshot on
/// `rollback`. [`MemoryStore::non_transactional`] builds a store whose
/// transaction calls are no-ops, for callers that must undo by hand.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    tables: BTreeMap<String, MemoryTable>,
    snapshot: Option<BTreeMap<String, MemoryTable>>,
    transactional: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            snapshot: None,
            transactional: true,
        }
    }

    pub fn non_transactional() -> Self {
        Self {
            transactional: false,
            ..Self::new()
        }
    }

    pub fn with_table(mut self, name: &str, columns: Vec<String>, rows: Vec<Row>) -> Self {
        self.insert_table(name, columns, rows);
        self
    }

    /// Add or replace a table. Columns missing from `columns` but present
    /// in rows are appended in sorted order.
    pub fn insert_table(&mut self, name: &str, mut columns: Vec<String>, rows: Vec<Row>) {
        let mut extra: Vec<&String> = rows
            .iter()
            .flat_map(|row| row.keys())
            .filter(|key| !columns.contains(key))
            .collect();
        extra.sort();
        extra.dedup();
        let extra: Vec<String> = extra.into_iter().cloned().collect();
        columns.extend(extra);
        self.tables
            .insert(name.to_string(), MemoryTable { columns, rows });
    }

    /// Add a table whose columns are the sorted union of the row keys.
    pub fn insert_rows(&mut self, name: &str, rows: Vec<Row>) {
        self.insert_table(name, Vec::new(), rows);
    }

    pub fn drop_table(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables
            .get(name)
            .ok_or_else(|| PrismError::Execution(format!("Table '{}' does not exist", name)))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut MemoryTable> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| PrismError::Execution(format!("Table '{}' does not exist", name)))
    }
}

impl SchemaProvider for MemoryStore {
    fn schema(&self) -> Result<Schema> {
        Ok(self
            .tables
            .iter()
            .fold(Schema::new(), |schema, (name, table)| {
                schema.with_table(Table::profile(name, &table.columns, &table.rows))
            }))
    }
}

impl Storage for MemoryStore {
    fn query(&self, _sql: &str) -> Result<ResultSet> {
        Err(PrismError::Execution(
            "MemoryStore cannot execute SQL".to_string(),
        ))
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(self.table(table)?.rows.clone())
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        Ok(self.table(table)?.columns.clone())
    }

    fn write_column(&mut self, table: &str, column: &str, values: &[Value]) -> Result<()> {
        let data = self.table_mut(table)?;
        if values.len() != data.rows.len() {
            return Err(PrismError::Execution(format!(
                "Column '{}' needs {} values for table '{}', got {}",
                column,
                data.rows.len(),
                table,
                values.len()
            )));
        }
        if !data.columns.iter().any(|c| c == column) {
            data.columns.push(column.to_string());
        }
        for (row, value) in data.rows.iter_mut().zip(values) {
            row.insert(column.to_string(), value.clone());
        }
        debug!(table, column, rows = values.len(), "Wrote column");
        Ok(())
    }

    fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        let data = self.table_mut(table)?;
        let before = data.columns.len();
        data.columns.retain(|c| c != column);
        if data.columns.len() == before {
            return Err(PrismError::Execution(format!(
                "Column '{}' does not exist in table '{}'",
                column, table
            )));
        }
        for row in &mut data.rows {
            row.remove(column);
        }
        debug!(table, column, "Dropped column");
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if !self.transactional {
            return Ok(());
        }
        if self.snapshot.is_some() {
            return Err(PrismError::Execution(
                "A transaction is already in progress".to_string(),
            ));
        }
        self.snapshot = Some(self.tables.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if !self.transactional {
            return Ok(());
        }
        match self.snapshot.take() {
            Some(tables) => {
                self.tables = tables;
                Ok(())
            }
            None => Err(PrismError::Execution(
                "No transaction in progress".to_string(),
            )),
        }
    }

    fn supports_transactions(&self) -> bool {
        self.transactional
    }
}
