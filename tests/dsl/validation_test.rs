//! Integration tests for query validation and correction.
//!
//! Schemas are built by hand or profiled from a SQLite store; queries are
//! written as the JSON a caller would send.

use prism::config::ValidationSettings;
use prism::dsl::{correct_query, validate_query, validate_query_with, Query};
use prism::schema::{Column, ColumnType, Schema, SchemaProvider, Table};
use prism::storage::SqliteStore;
use prism::value::{Row, Value};
use prism::PrismError;

fn shop() -> Schema {
    Schema::new()
        .with_table(
            Table::new("order_items")
                .with_column(Column::new("order_id", ColumnType::Id))
                .with_column(Column::new("product", ColumnType::Categorical))
                .with_column(Column::new("qty", ColumnType::Numeric))
                .with_column(Column::new("price", ColumnType::Numeric)),
        )
        .with_table(
            Table::new("orders")
                .with_column(Column::new("order_id", ColumnType::Id))
                .with_column(Column::new("status", ColumnType::Categorical))
                .with_column(Column::new("placed", ColumnType::Date)),
        )
}

fn query(json: &str) -> Query {
    serde_json::from_str(json).unwrap()
}

fn error(schema: &Schema, table: &str, json: &str) -> String {
    validate_query(schema, table, &query(json))
        .unwrap_err()
        .to_string()
}

const JOIN: &str = r#""join": [{"table": "orders", "on": {"left": "order_id", "right": "order_id"}}]"#;

// ============================================================================
// Joins
// ============================================================================

#[test]
fn test_ambiguous_column_names_both_tables() {
    let msg = error(&shop(), "order_items", &format!(r#"{{"select": ["order_id"], {}}}"#, JOIN));
    assert!(msg.contains("ambiguous"), "{}", msg);
    assert!(msg.contains("order_items"), "{}", msg);
    assert!(msg.contains("orders"), "{}", msg);
}

#[test]
fn test_qualified_column_resolves() {
    let q = query(&format!(
        r#"{{"select": ["orders.order_id", "status", {{"field": "qty", "aggregate": "sum", "as": "units"}}],
             "groupBy": ["orders.order_id", "status"], {}}}"#,
        JOIN
    ));
    assert!(validate_query(&shop(), "order_items", &q).is_ok());
}

#[test]
fn test_unknown_join_table() {
    let msg = error(
        &shop(),
        "order_items",
        r#"{"select": ["qty"], "join": [{"table": "orderz", "on": {"left": "order_id", "right": "order_id"}}]}"#,
    );
    assert!(msg.contains("Table 'orderz' not found"), "{}", msg);
    assert!(msg.contains("Did you mean 'orders'?"), "{}", msg);
}

#[test]
fn test_join_condition_must_resolve() {
    let msg = error(
        &shop(),
        "order_items",
        r#"{"select": ["qty"], "join": [{"table": "orders", "on": {"left": "order_id", "right": "orders.ordr_id"}}]}"#,
    );
    assert!(msg.contains("ordr_id"), "{}", msg);
}

// ============================================================================
// Aggregates
// ============================================================================

#[test]
fn test_aggregate_type_matrix() {
    let types = [
        ColumnType::Numeric,
        ColumnType::Categorical,
        ColumnType::Date,
        ColumnType::Id,
        ColumnType::Text,
    ];
    let aggregates = [
        "sum",
        "avg",
        "min",
        "max",
        "count",
        "count_distinct",
        "median",
        "p25",
        "p75",
        "stddev",
        "percentile",
    ];

    for column_type in types {
        let schema = Schema::new().with_table(Table::new("t").with_column(Column::new("c", column_type)));
        for aggregate in aggregates {
            let q = query(&format!(
                r#"{{"select": [{{"field": "c", "aggregate": "{}", "as": "out", "percentile": 0.5}}]}}"#,
                aggregate
            ));
            let any_type = matches!(aggregate, "count" | "count_distinct" | "min" | "max");
            let expected = column_type == ColumnType::Numeric || any_type;
            assert_eq!(
                validate_query(&schema, "t", &q).is_ok(),
                expected,
                "{} on {}",
                aggregate,
                column_type
            );
        }
    }
}

#[test]
fn test_percentile_bounds() {
    let msg = error(
        &shop(),
        "order_items",
        r#"{"select": [{"field": "price", "aggregate": "percentile", "as": "p", "percentile": 1.5}]}"#,
    );
    assert!(msg.contains("0 and 1"), "{}", msg);

    let msg = error(
        &shop(),
        "order_items",
        r#"{"select": [{"field": "price", "aggregate": "percentile", "as": "p95"}]}"#,
    );
    assert!(msg.contains("percentile"), "{}", msg);

    let ok = query(
        r#"{"select": [{"field": "price", "aggregate": "percentile", "as": "p95", "percentile": 0.95}]}"#,
    );
    assert!(validate_query(&shop(), "order_items", &ok).is_ok());
}

#[test]
fn test_having_cannot_use_raw_column() {
    let msg = error(
        &shop(),
        "order_items",
        r#"{"select": ["product", {"field": "qty", "aggregate": "sum", "as": "units"}],
            "groupBy": ["product"],
            "having": [{"field": "qty", "op": "gt", "value": 5}]}"#,
    );
    assert!(msg.contains("Available aggregates: units"), "{}", msg);
}

// ============================================================================
// Ordering of checks and settings
// ============================================================================

#[test]
fn test_select_is_checked_before_order_by() {
    let msg = error(
        &shop(),
        "order_items",
        r#"{"select": ["prodct"], "orderBy": ["nothing_here"]}"#,
    );
    assert!(msg.starts_with("Field 'prodct'"), "{}", msg);
    assert!(msg.contains("Did you mean 'product'?"), "{}", msg);
}

#[test]
fn test_validation_is_idempotent() {
    let q = query(&format!(r#"{{"select": ["order_id"], {}}}"#, JOIN));
    let first = validate_query(&shop(), "order_items", &q);
    let second = validate_query(&shop(), "order_items", &q);
    assert!(first.is_err());
    assert_eq!(first, second);
}

#[test]
fn test_threshold_setting_limits_suggestions() {
    let q = query(r#"{"select": ["prodcut"]}"#);
    let strict = ValidationSettings { fuzzy_threshold: 1 };
    let err = validate_query_with(&shop(), "order_items", &q, &strict).unwrap_err();
    assert!(!err.to_string().contains("Did you mean"), "{}", err);
    assert!(matches!(err, PrismError::Validation { suggestion: None, .. }));

    let err = validate_query(&shop(), "order_items", &q).unwrap_err();
    assert!(err.to_string().contains("Did you mean 'product'?"), "{}", err);
}

#[test]
fn test_correct_then_validate() {
    let q = query(r#"{"select": ["prodcut", {"field": "qtty", "aggregate": "sum", "as": "units"}], "groupBy": ["prodcut"]}"#);
    assert!(validate_query(&shop(), "order_items", &q).is_err());

    let (fixed, corrections) = correct_query(&shop(), "order_items", &q);
    assert!(corrections.iter().any(|c| c.original == "qtty" && c.corrected == "qty"));
    assert!(validate_query(&shop(), "order_items", &fixed).is_ok());
}

// ============================================================================
// Profiled schemas
// ============================================================================

#[test]
fn test_profiled_schema_from_sqlite() {
    let store = SqliteStore::open_in_memory().unwrap();
    let rows: Vec<Row> = [("2024-01-05", "north", 12.5), ("2024-02-11", "south", 8.0)]
        .iter()
        .map(|(day, region, amount)| {
            Row::from([
                ("day".to_string(), Value::from(*day)),
                ("region".to_string(), Value::from(*region)),
                ("amount".to_string(), Value::from(*amount)),
            ])
        })
        .collect();
    store
        .create_table("sales", &["day".into(), "region".into(), "amount".into()], &rows)
        .unwrap();
    let schema = store.schema().unwrap();

    let ok = query(
        r#"{"select": [{"field": "amount", "aggregate": "avg", "as": "mean"}],
            "groupBy": [{"field": "day", "bucket": "month"}]}"#,
    );
    assert!(validate_query(&schema, "sales", &ok).is_ok());

    let msg = error(
        &schema,
        "sales",
        r#"{"select": [{"field": "*", "aggregate": "count", "as": "n"}],
            "groupBy": [{"field": "region", "bucket": "month"}]}"#,
    );
    assert!(msg.contains("date columns"), "{}", msg);
}
