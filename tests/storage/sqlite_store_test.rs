//! Integration tests for the SQLite storage backend.

use std::path::PathBuf;

use prism::schema::{ColumnType, SchemaProvider};
use prism::storage::{SqliteStore, Storage};
use prism::value::{Row, Value};
use prism::PrismError;

fn order_rows() -> Vec<Row> {
    [
        (1, "2024-01-05", Some("north"), 12.5),
        (2, "2024-01-19", Some("south"), 8.0),
        (3, "2024-02-02", None, 20.0),
        (4, "2024-02-14", Some("north"), 3.25),
    ]
    .iter()
    .map(|(id, placed, region, amount)| {
        Row::from([
            ("order_id".to_string(), Value::from(*id)),
            ("placed".to_string(), Value::from(*placed)),
            ("region".to_string(), Value::from(*region)),
            ("amount".to_string(), Value::from(*amount)),
        ])
    })
    .collect()
}

fn columns() -> Vec<String> {
    ["order_id", "placed", "region", "amount"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    store.create_table("orders", &columns(), &order_rows()).unwrap();
    store
}

struct TempDb(PathBuf);

impl Drop for TempDb {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

// ============================================================================
// Schema profiling
// ============================================================================

#[test]
fn test_profiled_schema() {
    let store = store();
    let schema = store.schema().unwrap();
    assert_eq!(schema.table_names(), vec!["orders"]);

    let table = store.table_schema("orders").unwrap();
    assert_eq!(table.row_count, 4);
    let types: Vec<(&str, ColumnType)> = table
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.column_type))
        .collect();
    assert_eq!(
        types,
        vec![
            ("order_id", ColumnType::Id),
            ("placed", ColumnType::Date),
            ("region", ColumnType::Categorical),
            ("amount", ColumnType::Numeric),
        ]
    );

    let region = table.column("region").unwrap();
    assert_eq!(region.null_count, 1);
    assert_eq!(region.unique_count, 2);
    assert_eq!(region.total_count, 4);
    assert_eq!(
        region.sample_values,
        vec![Value::from("north"), Value::from("south")]
    );
}

#[test]
fn test_schema_reflects_written_columns() {
    let mut store = store();
    store
        .write_column(
            "orders",
            "big",
            &[false.into(), false.into(), true.into(), false.into()],
        )
        .unwrap();
    let table = store.table_schema("orders").unwrap();
    assert!(table.has_column("big"));
    assert_eq!(
        store.rows("orders").unwrap()[2]["big"],
        Value::from(1),
        "booleans are stored as integers"
    );
}

#[test]
fn test_missing_table_schema() {
    let err = store().table_schema("customers").unwrap_err();
    assert_eq!(err.to_string(), "Table 'customers' does not exist");
}

// ============================================================================
// Column writes
// ============================================================================

#[test]
fn test_write_column_length_mismatch() {
    let mut store = store();
    let err = store
        .write_column("orders", "x", &[Value::from(1)])
        .unwrap_err();
    assert!(matches!(err, PrismError::Execution(_)));
    assert_eq!(
        err.to_string(),
        "Column 'x' needs 4 values for table 'orders', got 1"
    );
    assert!(!store.has_column("orders", "x").unwrap());
}

#[test]
fn test_overwrite_and_drop_column() {
    let mut store = store();
    let halves: Vec<Value> = [6.25, 4.0, 10.0, 1.625].iter().map(|v| Value::from(*v)).collect();
    store.write_column("orders", "half", &halves).unwrap();
    store
        .write_column("orders", "half", &[Value::Null, 1.into(), 2.into(), 3.into()])
        .unwrap();
    let result = store
        .query("SELECT \"half\" FROM \"orders\" ORDER BY rowid")
        .unwrap();
    assert_eq!(
        result.column_values("half"),
        vec![Value::Null, Value::from(1), Value::from(2), Value::from(3)]
    );

    store.drop_column("orders", "half").unwrap();
    assert_eq!(store.columns("orders").unwrap(), columns());

    let err = store.drop_column("orders", "half").unwrap_err();
    assert_eq!(
        err.to_string(),
        "Column 'half' does not exist in table 'orders'"
    );
}

#[test]
fn test_commit_keeps_writes() {
    let mut store = store();
    store.begin().unwrap();
    store
        .write_column("orders", "flag", &[1.into(), 0.into(), 1.into(), 0.into()])
        .unwrap();
    store.commit().unwrap();
    assert!(store.has_column("orders", "flag").unwrap());
}

#[test]
fn test_rollback_restores_overwritten_values() {
    let mut store = store();
    store.begin().unwrap();
    store
        .write_column("orders", "amount", &[Value::Null, Value::Null, Value::Null, Value::Null])
        .unwrap();
    store.rollback().unwrap();
    let amounts = store
        .rows("orders")
        .unwrap()
        .into_iter()
        .map(|row| row["amount"].clone())
        .collect::<Vec<_>>();
    assert_eq!(
        amounts,
        vec![Value::from(12.5), Value::from(8), Value::from(20), Value::from(3.25)]
    );
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn test_file_backed_store_persists() {
    let db = TempDb(std::env::temp_dir().join(format!("prism-store-{}.db", std::process::id())));
    let _ = std::fs::remove_file(&db.0);

    {
        let mut store = SqliteStore::open(&db.0).unwrap();
        store.create_table("orders", &columns(), &order_rows()).unwrap();
        store
            .write_column("orders", "doubled", &[25.into(), 16.into(), 40.into(), 6.5.into()])
            .unwrap();
    }

    let reopened = SqliteStore::open(&db.0).unwrap();
    let rows = reopened.rows("orders").unwrap();
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3]["doubled"], Value::from(6.5));
    assert_eq!(rows[2]["region"], Value::Null);
}
