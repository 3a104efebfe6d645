//! Integration tests for the in-process aggregate fallback.
//!
//! SQLite has no PERCENTILE_CONT or STDDEV_SAMP, so queries using them take
//! the fallback path: the engine runs the pull query and the rest happens
//! in-process.

use prism::dsl::fallback::pulled_columns;
use prism::dsl::{
    aggregate_rows, compile_query, execute_aggregate_fallback, validate_query, ExecutionPath, Query,
};
use prism::schema::SchemaProvider;
use prism::sql::Dialect;
use prism::storage::{SqliteStore, Storage};
use prism::value::{ResultSet, Row, Value};

fn query(json: &str) -> Query {
    serde_json::from_str(json).unwrap()
}

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// `sales(region, amount)`: east 1, 3, 8; west 10, 20; one null region.
fn sales_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    let data = [
        (Some("east"), 1),
        (Some("west"), 10),
        (Some("east"), 3),
        (None, 5),
        (Some("east"), 8),
        (Some("west"), 20),
    ];
    let rows: Vec<Row> = data
        .iter()
        .map(|(region, amount)| row(&[("region", Value::from(*region)), ("amount", Value::from(*amount))]))
        .collect();
    store
        .create_table("sales", &["region".into(), "amount".into()], &rows)
        .unwrap();
    store
}

fn run(store: &SqliteStore, table: &str, json: &str) -> (ExecutionPath, ResultSet) {
    let schema = store.schema().unwrap();
    let q = query(json);
    validate_query(&schema, table, &q).unwrap();
    let path = ExecutionPath::choose(&q, Dialect::Sqlite);
    let result = execute_aggregate_fallback(store, &schema, table, &q, Dialect::Sqlite).unwrap();
    (path, result)
}

fn number(value: &Value) -> f64 {
    value.to_number().unwrap()
}

// ============================================================================
// Order statistics
// ============================================================================

#[test]
fn test_median_per_group() {
    let store = sales_store();
    let (path, result) = run(
        &store,
        "sales",
        r#"{"select": ["region", {"field": "amount", "aggregate": "median", "as": "mid"}],
            "filter": [{"field": "region", "op": "is_not_null"}],
            "orderBy": ["region"]}"#,
    );
    assert_eq!(path, ExecutionPath::Fallback);
    assert_eq!(result.columns, vec!["region", "mid"]);
    assert_eq!(
        result.column_values("region"),
        vec![Value::from("east"), Value::from("west")]
    );
    assert_eq!(result.column_values("mid"), vec![Value::from(3), Value::from(15)]);
}

#[test]
fn test_quartiles_interpolate() {
    let store = sales_store();
    let (_, result) = run(
        &store,
        "sales",
        r#"{"select": ["region",
                       {"field": "amount", "aggregate": "p25", "as": "low"},
                       {"field": "amount", "aggregate": "p75", "as": "high"},
                       {"field": "amount", "aggregate": "percentile", "as": "top", "percentile": 1.0}],
            "filter": [{"field": "region", "op": "eq", "value": "east"}]}"#,
    );
    assert_eq!(result.rows.len(), 1);
    let east = &result.rows[0];
    assert_eq!(east["low"], Value::from(2));
    assert_eq!(east["high"], Value::from(5.5));
    assert_eq!(east["top"], Value::from(8));
}

#[test]
fn test_stddev_with_rank_runs_windows_in_process() {
    let store = sales_store();
    let (path, result) = run(
        &store,
        "sales",
        r#"{"select": ["region",
                       {"field": "amount", "aggregate": "stddev", "as": "sd"},
                       {"window": "rank", "as": "spread_rank", "orderBy": [{"field": "sd", "direction": "desc"}]}],
            "filter": [{"field": "region", "op": "is_not_null"}],
            "orderBy": ["region"]}"#,
    );
    assert_eq!(path, ExecutionPath::FallbackWithWindows);
    assert_eq!(result.columns, vec!["region", "sd", "spread_rank"]);

    let sd = result.column_values("sd");
    assert!((number(&sd[0]) - 13f64.sqrt()).abs() < 1e-9);
    assert!((number(&sd[1]) - 50f64.sqrt()).abs() < 1e-9);
    assert_eq!(
        result.column_values("spread_rank"),
        vec![Value::from(2), Value::from(1)]
    );
}

#[test]
fn test_stddev_of_single_value_is_null() {
    let store = sales_store();
    let (_, result) = run(
        &store,
        "sales",
        r#"{"select": ["region", {"field": "amount", "aggregate": "stddev", "as": "sd"}],
            "filter": [{"field": "region", "op": "is_null"}]}"#,
    );
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["region"], Value::Null);
    assert_eq!(result.rows[0]["sd"], Value::Null);
}

// ============================================================================
// Agreement with the SQL path
// ============================================================================

#[test]
fn test_null_ordering_matches_sql() {
    let store = sales_store();
    let schema = store.schema().unwrap();
    for direction in ["asc", "desc"] {
        let q = query(&format!(
            r#"{{"select": ["region", {{"field": "amount", "aggregate": "sum", "as": "total"}}],
                 "orderBy": [{{"field": "region", "direction": "{}"}}]}}"#,
            direction
        ));
        let sql = compile_query(&schema, "sales", &q, Dialect::Sqlite).unwrap();
        let from_sql = store.query(&sql).unwrap();
        let in_process =
            execute_aggregate_fallback(&store, &schema, "sales", &q, Dialect::Sqlite).unwrap();
        assert_eq!(from_sql.rows, in_process.rows, "direction {}", direction);
    }

    let (_, result) = run(
        &store,
        "sales",
        r#"{"select": ["region", {"field": "amount", "aggregate": "sum", "as": "total"}],
            "orderBy": [{"field": "region", "direction": "desc"}]}"#,
    );
    assert_eq!(
        result.column_values("region"),
        vec![Value::Null, Value::from("west"), Value::from("east")]
    );
}

#[test]
fn test_having_against_null_matches_sql() {
    let store = SqliteStore::open_in_memory().unwrap();
    let rows: Vec<Row> = [(Some("east"), None), (Some("east"), None), (Some("west"), Some(10))]
        .iter()
        .map(|(region, amount)| row(&[("region", Value::from(*region)), ("amount", Value::from(*amount))]))
        .collect();
    store
        .create_table("sales", &["region".into(), "amount".into()], &rows)
        .unwrap();
    let schema = store.schema().unwrap();

    for (op, expected) in [("eq", "east"), ("neq", "west")] {
        let q = query(&format!(
            r#"{{"select": ["region", {{"field": "amount", "aggregate": "sum", "as": "total"}}],
                 "having": [{{"field": "total", "op": "{}", "value": null}}],
                 "orderBy": ["region"]}}"#,
            op
        ));
        validate_query(&schema, "sales", &q).unwrap();
        let sql = compile_query(&schema, "sales", &q, Dialect::Sqlite).unwrap();
        let from_sql = store.query(&sql).unwrap();
        let in_process =
            execute_aggregate_fallback(&store, &schema, "sales", &q, Dialect::Sqlite).unwrap();
        assert_eq!(from_sql.rows, in_process.rows, "op {}", op);
        assert_eq!(in_process.column_values("region"), vec![Value::from(expected)]);
    }
}

#[test]
fn test_fallback_through_join() {
    let store = SqliteStore::open_in_memory().unwrap();
    let items: Vec<Row> = [(1, 2), (1, 4), (2, 10), (3, 1)]
        .iter()
        .map(|(id, qty)| row(&[("order_id", Value::from(*id)), ("qty", Value::from(*qty))]))
        .collect();
    let orders: Vec<Row> = [(1, "paid"), (2, "paid"), (3, "open")]
        .iter()
        .map(|(id, status)| row(&[("order_id", Value::from(*id)), ("status", Value::from(*status))]))
        .collect();
    store
        .create_table("order_items", &["order_id".into(), "qty".into()], &items)
        .unwrap();
    store
        .create_table("orders", &["order_id".into(), "status".into()], &orders)
        .unwrap();

    let json = r#"{"select": ["orders.status", {"field": "qty", "aggregate": "median", "as": "typical"}],
                   "join": [{"table": "orders", "on": {"left": "order_id", "right": "order_id"}}],
                   "orderBy": ["orders.status"]}"#;
    assert_eq!(pulled_columns(&query(json)), vec!["orders.status", "qty"]);

    let (_, result) = run(&store, "order_items", json);
    assert_eq!(result.columns, vec!["orders.status", "typical"]);
    assert_eq!(
        result.column_values("orders.status"),
        vec![Value::from("open"), Value::from("paid")]
    );
    assert_eq!(
        result.column_values("typical"),
        vec![Value::from(1), Value::from(4)]
    );
}

// ============================================================================
// Rows without an engine
// ============================================================================

#[test]
fn test_aggregate_rows_without_grouping_keeps_row_order() {
    let rows = vec![
        row(&[("day", Value::from("2024-03-15")), ("amount", Value::from(3))]),
        row(&[("day", Value::from("2024-01-02")), ("amount", Value::from(1))]),
        row(&[("day", Value::from("not a date")), ("amount", Value::from(2))]),
    ];
    let q = query(
        r#"{"select": ["day", "amount",
                       {"window": "running_sum", "field": "amount", "as": "cum", "orderBy": ["amount"]}],
            "limit": 2}"#,
    );
    let result = aggregate_rows(&rows, &q);
    assert_eq!(result.columns, vec!["day", "amount", "cum"]);
    assert_eq!(result.column_values("amount"), vec![Value::from(3), Value::from(1)]);
    assert_eq!(result.column_values("cum"), vec![Value::from(6), Value::from(1)]);
}

#[test]
fn test_ungrouped_aggregate_over_no_rows() {
    let q = query(
        r#"{"select": [{"field": "*", "aggregate": "count", "as": "n"},
                       {"field": "amount", "aggregate": "sum", "as": "total"}]}"#,
    );
    let result = aggregate_rows(&[], &q);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["n"], Value::from(0));
    assert_eq!(result.rows[0]["total"], Value::Null);
}
