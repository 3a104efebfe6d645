//! Integration tests for query compilation.
//!
//! Emitted SQL is parsed back with sqlparser for every dialect, and the
//! SQLite output is executed against a bundled SQLite store and compared
//! with the in-process aggregation of the same query.

use insta::assert_snapshot;
use prism::dsl::{
    compile_query, execute_aggregate_fallback, has_fallback_aggregates, has_window_functions,
    validate_query, Query,
};
use prism::schema::{Column, ColumnType, Schema, SchemaProvider, Table};
use prism::sql::{Dialect, SqlDialect};
use prism::storage::{SqliteStore, Storage};
use prism::value::{ResultSet, Row, Value};
use prism::PrismError;
use sqlparser::dialect::{
    DuckDbDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect,
};
use sqlparser::parser::Parser;

fn parses(sql: &str, dialect: Dialect) {
    let parser_dialect: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::DuckDb => Box::new(DuckDbDialect {}),
        Dialect::Postgres => Box::new(PostgreSqlDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::TSql => Box::new(MsSqlDialect {}),
        Dialect::Sqlite => Box::new(SQLiteDialect {}),
    };
    if let Err(e) = Parser::parse_sql(&*parser_dialect, sql) {
        panic!("Invalid SQL for {:?}: {}\nSQL: {}", dialect, e, sql);
    }
}

fn query(json: &str) -> Query {
    serde_json::from_str(json).unwrap()
}

fn shop() -> Schema {
    Schema::new()
        .with_table(
            Table::new("order_items")
                .with_column(Column::new("order_id", ColumnType::Id))
                .with_column(Column::new("product", ColumnType::Categorical))
                .with_column(Column::new("qty", ColumnType::Numeric)),
        )
        .with_table(
            Table::new("orders")
                .with_column(Column::new("order_id", ColumnType::Id))
                .with_column(Column::new("status", ColumnType::Categorical))
                .with_column(Column::new("placed", ColumnType::Date)),
        )
}

/// `sales(region, day, amount)` with one null region.
fn sales_store() -> SqliteStore {
    let store = SqliteStore::open_in_memory().unwrap();
    let data = [
        (Some("east"), "2024-01-03", 1),
        (Some("west"), "2024-01-17", 10),
        (Some("east"), "2024-02-09", 3),
        (Some("east"), "2024-02-21", 8),
        (Some("west"), "2024-03-02", 20),
        (None, "2024-03-15", 5),
    ];
    let rows: Vec<Row> = data
        .iter()
        .map(|(region, day, amount)| {
            Row::from([
                ("region".to_string(), Value::from(*region)),
                ("day".to_string(), Value::from(*day)),
                ("amount".to_string(), Value::from(*amount)),
            ])
        })
        .collect();
    store
        .create_table("sales", &["region".into(), "day".into(), "amount".into()], &rows)
        .unwrap();
    store
}

/// Run `json` on SQLite and in-process; both must agree exactly.
fn sql_and_fallback(json: &str) -> (ResultSet, ResultSet) {
    let store = sales_store();
    let schema = store.schema().unwrap();
    let q = query(json);
    validate_query(&schema, "sales", &q).unwrap();

    let sql = compile_query(&schema, "sales", &q, Dialect::Sqlite).unwrap();
    parses(&sql, Dialect::Sqlite);
    let from_sql = store.query(&sql).unwrap();
    let in_process =
        execute_aggregate_fallback(&store, &schema, "sales", &q, Dialect::Sqlite).unwrap();
    (from_sql, in_process)
}

// ============================================================================
// Well-formed SQL in every dialect
// ============================================================================

#[test]
fn test_every_dialect_parses_and_names_each_alias_once() {
    let q = query(
        r#"{"select": ["orders.status",
                       {"field": "qty", "aggregate": "sum", "as": "units"},
                       {"field": "order_items.order_id", "aggregate": "count_distinct", "as": "orders_seen"},
                       {"window": "rank", "as": "position", "orderBy": [{"field": "units", "direction": "desc"}]},
                       {"window": "pct_of_total", "field": "units", "as": "share"}],
            "join": [{"table": "orders", "on": {"left": "order_id", "right": "order_id"}, "type": "left"}],
            "groupBy": [{"field": "placed", "bucket": "month"}, "orders.status"],
            "filter": [{"field": "product", "op": "in", "value": ["tea", "coffee"]}],
            "orderBy": ["position"],
            "limit": 20}"#,
    );
    validate_query(&shop(), "order_items", &q).unwrap();
    assert!(has_window_functions(&q));
    assert!(!has_fallback_aggregates(&q));

    for dialect in Dialect::ALL {
        let sql = compile_query(&shop(), "order_items", &q, dialect).unwrap();
        parses(&sql, dialect);
        for alias in ["placed_month", "units", "orders_seen", "position", "share"] {
            let quoted = format!("AS {}", dialect.quote_identifier(alias));
            assert_eq!(sql.matches(&quoted).count(), 1, "{} in {:?}:\n{}", alias, dialect, sql);
        }
    }
}

#[test]
fn test_join_snapshot_postgres() {
    let q = query(
        r#"{"select": ["orders.status", {"field": "qty", "aggregate": "sum", "as": "units"}],
            "join": [{"table": "orders", "on": {"left": "order_id", "right": "order_id"}}],
            "groupBy": ["orders.status"],
            "orderBy": [{"field": "units", "direction": "desc"}]}"#,
    );
    validate_query(&shop(), "order_items", &q).unwrap();
    let sql = compile_query(&shop(), "order_items", &q, Dialect::Postgres).unwrap();
    assert_snapshot!(sql, @r#"
    SELECT
      "orders"."status" AS "orders.status",
      SUM("qty") AS "units"
    FROM "order_items"
    INNER JOIN "orders" ON "order_items"."order_id" = "orders"."order_id"
    GROUP BY "orders"."status"
    ORDER BY "units" DESC NULLS FIRST
    "#);
}

#[test]
fn test_order_statistics_need_fallback_on_sqlite() {
    let q = query(r#"{"select": ["region", {"field": "amount", "aggregate": "p75", "as": "upper"}]}"#);
    assert!(has_fallback_aggregates(&q));
    let store = sales_store();
    let schema = store.schema().unwrap();
    let err = compile_query(&schema, "sales", &q, Dialect::Sqlite).unwrap_err();
    assert!(matches!(err, PrismError::Execution(_)));
    assert!(err.to_string().contains("fallback"), "{}", err);

    let sql = compile_query(&schema, "sales", &q, Dialect::Postgres).unwrap();
    parses(&sql, Dialect::Postgres);
    assert!(sql.contains("PERCENTILE_CONT(0.75)"), "{}", sql);
}

// ============================================================================
// SQLite execution agrees with in-process aggregation
// ============================================================================

#[test]
fn test_grouped_totals_agree() {
    let (sql, fallback) = sql_and_fallback(
        r#"{"select": ["region",
                       {"field": "amount", "aggregate": "sum", "as": "total"},
                       {"field": "*", "aggregate": "count", "as": "n"},
                       {"field": "amount", "aggregate": "max", "as": "largest"}],
            "groupBy": ["region"],
            "orderBy": ["region"]}"#,
    );
    assert_eq!(sql.columns, vec!["region", "total", "n", "largest"]);
    assert_eq!(sql.columns, fallback.columns);
    assert_eq!(sql.rows, fallback.rows);
    // Ascending order puts the null group last on both paths.
    assert_eq!(
        sql.column_values("region"),
        vec![Value::from("east"), Value::from("west"), Value::Null]
    );
}

#[test]
fn test_month_buckets_agree() {
    let (sql, fallback) = sql_and_fallback(
        r#"{"select": ["day", {"field": "amount", "aggregate": "sum", "as": "total"}],
            "groupBy": [{"field": "day", "bucket": "month"}],
            "orderBy": ["day_month"]}"#,
    );
    assert_eq!(sql.columns, vec!["day_month", "total"]);
    assert_eq!(sql.rows, fallback.rows);
    assert_eq!(
        sql.column_values("day_month"),
        vec![
            Value::from("2024-01-01"),
            Value::from("2024-02-01"),
            Value::from("2024-03-01")
        ]
    );
    assert_eq!(
        sql.column_values("total"),
        vec![Value::from(11), Value::from(11), Value::from(25)]
    );
}

#[test]
fn test_having_and_limit_agree() {
    let (sql, fallback) = sql_and_fallback(
        r#"{"select": ["region", {"field": "amount", "aggregate": "sum", "as": "total"}],
            "groupBy": ["region"],
            "filter": [{"field": "region", "op": "is_not_null"}],
            "having": [{"field": "total", "op": "gt", "value": 5}],
            "orderBy": [{"field": "total", "direction": "desc"}],
            "limit": 1}"#,
    );
    assert_eq!(sql.rows.len(), 1);
    assert_eq!(sql.rows[0]["region"], Value::from("west"));
    assert_eq!(sql.rows[0]["total"], Value::from(30));
    assert_eq!(sql.rows, fallback.rows);
}

#[test]
fn test_windows_over_aggregates_agree() {
    let (sql, fallback) = sql_and_fallback(
        r#"{"select": ["region",
                       {"field": "amount", "aggregate": "sum", "as": "total"},
                       {"window": "rank", "as": "pos", "orderBy": [{"field": "total", "direction": "desc"}]},
                       {"window": "running_sum", "field": "total", "as": "cum", "orderBy": ["region"]}],
            "groupBy": ["region"],
            "filter": [{"field": "region", "op": "is_not_null"}],
            "orderBy": ["region"]}"#,
    );
    assert_eq!(sql.columns, vec!["region", "total", "pos", "cum"]);
    assert_eq!(sql.columns, fallback.columns);
    assert_eq!(
        sql.column_values("pos"),
        vec![Value::from(2), Value::from(1)]
    );
    assert_eq!(
        sql.column_values("cum"),
        vec![Value::from(12), Value::from(42)]
    );
    assert_eq!(sql.rows, fallback.rows);
}
