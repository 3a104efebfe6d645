use std::path::Path;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, ToSql};
use tracing::{debug, info};

use super::Storage;
use crate::error::{PrismError, Result};
use crate::schema::{Schema, SchemaProvider, Table};
use crate::sql::{
    placeholder, AlterTable, ColumnAffinity, Dialect, Expr, ExprExt, OrderByExpr, Query,
    SqlDialect, TableRef, Update,
};
use crate::value::{ResultSet, Row, Value};

const DIALECT: Dialect = Dialect::Sqlite;

/// Embedded SQLite database.
///
/// Rows are ordered by `rowid`, which is also how written column values are
/// aligned to rows.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        info!("Opened SQLite store");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create `table` with untyped `columns` and insert `rows`.
    pub fn create_table(&self, table: &str, columns: &[String], rows: &[Row]) -> Result<()> {
        let column_list: Vec<String> = columns
            .iter()
            .map(|c| DIALECT.quote_identifier(c))
            .collect();
        self.conn.execute_batch(&format!(
            "CREATE TABLE {} ({})",
            DIALECT.quote_identifier(table),
            column_list.join(", ")
        ))?;

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let insert = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            DIALECT.quote_identifier(table),
            column_list.join(", "),
            placeholders.join(", ")
        );
        let mut stmt = self.conn.prepare(&insert)?;
        for row in rows {
            let values = columns
                .iter()
                .map(|c| row.get(c).cloned().unwrap_or_default());
            stmt.execute(params_from_iter(values))?;
        }
        debug!(table, rows = rows.len(), "Created table");
        Ok(())
    }

    fn table_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(names)
    }

    fn row_count(&self, table: &str) -> Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", DIALECT.quote_identifier(table));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn rowids(&self, table: &str) -> Result<Vec<i64>> {
        let sql = Query::new()
            .select(vec![rowid()])
            .from(TableRef::new(table))
            .order_by(vec![OrderByExpr::asc(rowid())])
            .to_sql(DIALECT);
        let mut stmt = self.conn.prepare(&sql)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }
}

fn rowid() -> Expr {
    Expr::Raw("rowid".to_string())
}

/// Affinity for a new column: integer or real when every present value is
/// numeric, text when every present value is text.
fn affinity(values: &[Value]) -> Option<ColumnAffinity> {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        None
    } else if present
        .iter()
        .all(|v| matches!(v, Value::Number(n) if n.fract() == 0.0) || matches!(v, Value::Bool(_)))
    {
        Some(ColumnAffinity::Integer)
    } else if present.iter().all(|v| matches!(v, Value::Number(_))) {
        Some(ColumnAffinity::Real)
    } else if present.iter().all(|v| matches!(v, Value::Text(_))) {
        Some(ColumnAffinity::Text)
    } else {
        None
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Number(i as f64),
        ValueRef::Real(f) => Value::number(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*b))),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                ToSqlOutput::Owned(SqlValue::Integer(*n as i64))
            }
            Value::Number(n) => ToSqlOutput::Owned(SqlValue::Real(*n)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl SchemaProvider for SqliteStore {
    fn schema(&self) -> Result<Schema> {
        let mut schema = Schema::new();
        for name in self.table_names()? {
            let columns = self.columns(&name)?;
            let rows = self.rows(&name)?;
            schema = schema.with_table(Table::profile(&name, &columns, &rows));
        }
        Ok(schema)
    }
}

impl Storage for SqliteStore {
    fn query(&self, sql: &str) -> Result<ResultSet> {
        debug!(sql, "Executing query");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            let mut out = Row::with_capacity(columns.len());
            for (i, name) in columns.iter().enumerate() {
                out.insert(name.clone(), from_sql(row.get_ref(i)?));
            }
            rows.push(out);
        }
        Ok(ResultSet::new(columns, rows))
    }

    fn rows(&self, table: &str) -> Result<Vec<Row>> {
        let sql = Query::new()
            .select_star()
            .from(TableRef::new(table))
            .order_by(vec![OrderByExpr::asc(rowid())])
            .to_sql(DIALECT);
        Ok(self.query(&sql)?.rows)
    }

    fn columns(&self, table: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = stmt
            .query_map(params![table], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        if columns.is_empty() {
            return Err(PrismError::Execution(format!("Table '{}' does not exist", table)));
        }
        Ok(columns)
    }

    fn write_column(&mut self, table: &str, column: &str, values: &[Value]) -> Result<()> {
        let count = self.row_count(table)?;
        if values.len() != count {
            return Err(PrismError::Execution(format!(
                "Column '{}' needs {} values for table '{}', got {}",
                column,
                count,
                table,
                values.len()
            )));
        }
        if !self.has_column(table, column)? {
            let alter = AlterTable::add_column(table, column, affinity(values));
            self.conn.execute_batch(&alter.to_sql(DIALECT))?;
        }

        let update = Update::table(table)
            .set(column, placeholder(1))
            .filter(rowid().eq(placeholder(2)))
            .to_sql(DIALECT);
        let mut stmt = self.conn.prepare(&update)?;
        for (id, value) in self.rowids(table)?.into_iter().zip(values) {
            stmt.execute(params![value, id])?;
        }
        debug!(table, column, rows = count, "Wrote column");
        Ok(())
    }

    fn drop_column(&mut self, table: &str, column: &str) -> Result<()> {
        if !self.has_column(table, column)? {
            return Err(PrismError::Execution(format!(
                "Column '{}' does not exist in table '{}'",
                column, table
            )));
        }
        self.conn
            .execute_batch(&AlterTable::drop_column(table, column).to_sql(DIALECT))?;
        debug!(table, column, "Dropped column");
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        let rows: Vec<Row> = [("A", 80), ("B", 90), ("A", 70)]
            .iter()
            .map(|(grade, score)| {
                Row::from([
                    ("grade".to_string(), Value::from(*grade)),
                    ("score".to_string(), Value::from(*score)),
                ])
            })
            .collect();
        store
            .create_table("grades", &["grade".into(), "score".into()], &rows)
            .unwrap();
        store
    }

    #[test]
    fn test_rows_round_trip_values() {
        let store = store();
        let rows = store.rows("grades").unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1]["score"], Value::from(90));
        assert_eq!(rows[2]["grade"], Value::from("A"));
    }

    #[test]
    fn test_write_column_aligns_by_rowid() {
        let mut store = store();
        store
            .write_column("grades", "pct", &[0.8.into(), Value::Null, 0.7.into()])
            .unwrap();
        let pct: Vec<Value> = store
            .rows("grades")
            .unwrap()
            .into_iter()
            .map(|row| row["pct"].clone())
            .collect();
        assert_eq!(pct, vec![Value::from(0.8), Value::Null, Value::from(0.7)]);
        assert_eq!(
            store.columns("grades").unwrap(),
            vec!["grade", "score", "pct"]
        );
    }

    #[test]
    fn test_transaction_rollback_drops_added_column() {
        let mut store = store();
        store.begin().unwrap();
        store
            .write_column("grades", "x", &[1.into(), 2.into(), 3.into()])
            .unwrap();
        store.rollback().unwrap();
        assert!(!store.has_column("grades", "x").unwrap());
    }

    #[test]
    fn test_query_result_set() {
        let store = store();
        let result = store
            .query("SELECT \"grade\", SUM(\"score\") AS \"total\" FROM \"grades\" GROUP BY \"grade\" ORDER BY \"grade\"")
            .unwrap();
        assert_eq!(result.columns, vec!["grade", "total"]);
        assert_eq!(result.rows[0]["total"], Value::from(150));
    }

    #[test]
    fn test_missing_table() {
        let store = store();
        assert!(store.columns("nope").is_err());
        assert!(store.query("SELECT * FROM nope").is_err());
    }

    #[test]
    fn test_affinity() {
        assert_eq!(affinity(&[1.into(), Value::Null]), Some(ColumnAffinity::Integer));
        assert_eq!(affinity(&[1.5.into()]), Some(ColumnAffinity::Real));
        assert_eq!(affinity(&["a".into()]), Some(ColumnAffinity::Text));
        assert_eq!(affinity(&["a".into(), 1.into()]), None);
    }
}
