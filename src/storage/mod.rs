//! Tabular storage backends.
//!
//! The transform pipeline reads rows and materializes derived columns
//! through [`Storage`]; the aggregate fallback pulls rows with
//! [`Storage::query`]. Two backends ship:
//!
//! - [`MemoryStore`]: rows held in memory, snapshot transactions. Cannot run
//!   SQL.
//! - [`SqliteStore`]: an embedded SQLite database that runs compiled
//!   SQLite-dialect queries.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::schema::SchemaProvider;
use crate::value::{ResultSet, Row, Value};

/// Table storage with column-level writes.
///
/// Row order is stable: `rows()` and `write_column()` agree on positions.
pub trait Storage: SchemaProvider {
    /// Run a query and collect its result.
    fn query(&self, sql: &str) -> Result<ResultSet>;

    /// Every row of `table`, in storage order.
    fn rows(&self, table: &str) -> Result<Vec<Row>>;

    /// Column names of `table`, in declaration order.
    fn columns(&self, table: &str) -> Result<Vec<String>>;

    /// Add `column` (or overwrite it) with exactly one value per row.
    fn write_column(&mut self, table: &str, column: &str, values: &[Value]) -> Result<()>;

    fn drop_column(&mut self, table: &str, column: &str) -> Result<()>;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Whether `rollback` undoes writes. Callers must undo by hand otherwise.
    fn supports_transactions(&self) -> bool {
        true
    }

    fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        Ok(self.columns(table)?.iter().any(|c| c == column))
    }
}
