//! Declarative analytic queries.
//!
//! A [`Query`] is JSON-shaped: a select list of columns, aggregates and
//! window functions, plus joins, grouping (with time buckets), filters,
//! having, ordering and a limit. The lifecycle is:
//!
//! 1. [`validate_query`] checks the query against a [`Schema`](crate::schema::Schema)
//!    ([`correct_query`] can fix misspellings first).
//! 2. [`ExecutionPath::choose`] picks how to run it.
//! 3. [`compile_query`] emits SQL, or [`execute_aggregate_fallback`] pulls
//!    rows and aggregates them in-process.
//!
//! # Example
//!
//! ```ignore
//! use prism::dsl::{compile_query, validate_query, Query};
//! use prism::sql::Dialect;
//!
//! let query: Query = serde_json::from_str(r#"{
//!     "select": ["region", {"field": "amount", "aggregate": "sum", "as": "total"}],
//!     "groupBy": ["region"]
//! }"#)?;
//! validate_query(&schema, "sales", &query)?;
//! let sql = compile_query(&schema, "sales", &query, Dialect::Postgres)?;
//! ```

pub mod compile;
pub mod fallback;
pub mod model;
pub mod validation;

pub use compile::{
    compile_pull_query, compile_query, dialect_supports, has_fallback_aggregates,
    has_window_functions,
};
pub use fallback::{aggregate_rows, execute_aggregate_fallback};
pub use model::*;
pub use validation::{
    correct_query, correct_query_with, validate_query, validate_query_with, Correction,
};

use crate::sql::Dialect;

/// How a validated query should be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionPath {
    /// Compile to SQL and run it on the engine.
    Sql,
    /// Pull rows, aggregate in-process.
    Fallback,
    /// Pull rows, aggregate in-process, then apply windows in-process.
    FallbackWithWindows,
}

impl ExecutionPath {
    /// Use SQL unless the query needs an aggregate the dialect lacks.
    pub fn choose(query: &Query, dialect: Dialect) -> Self {
        if !has_fallback_aggregates(query) || dialect_supports(query, dialect) {
            ExecutionPath::Sql
        } else if has_window_functions(query) {
            ExecutionPath::FallbackWithWindows
        } else {
            ExecutionPath::Fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose_path() {
        let median: Query = serde_json::from_str(
            r#"{"select": [{"field": "amount", "aggregate": "median", "as": "mid"}]}"#,
        )
        .unwrap();
        assert_eq!(ExecutionPath::choose(&median, Dialect::DuckDb), ExecutionPath::Sql);
        assert_eq!(ExecutionPath::choose(&median, Dialect::Sqlite), ExecutionPath::Fallback);

        let windowed: Query = serde_json::from_str(
            r#"{"select": [{"field": "amount", "aggregate": "stddev", "as": "sd"},
                           {"window": "rank", "as": "r", "orderBy": ["sd"]}]}"#,
        )
        .unwrap();
        assert_eq!(
            ExecutionPath::choose(&windowed, Dialect::Sqlite),
            ExecutionPath::FallbackWithWindows
        );

        let plain: Query = serde_json::from_str(r#"{"select": ["region"]}"#).unwrap();
        assert_eq!(ExecutionPath::choose(&plain, Dialect::MySql), ExecutionPath::Sql);
    }
}
