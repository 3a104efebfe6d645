//! DuckDB SQL dialect.
//!
//! DuckDB is PostgreSQL-compatible with extensions:
//! - ANSI identifier quoting (`"`)
//! - `DATE_TRUNC` returning `DATE` for date inputs
//! - `QUANTILE_CONT` / `MEDIAN` aggregates

use super::helpers;
use super::SqlDialect;
use crate::sql::expr::{func, lit_float, Expr};

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn format_placeholder(&self, n: usize) -> String {
        format!("${}", n)
    }

    // Uses default date_trunc (DATE_TRUNC('unit', x))

    fn percentile_cont(&self, expr: Expr, fraction: f64) -> Option<Expr> {
        if fraction == 0.5 {
            return Some(func("MEDIAN", vec![expr]));
        }
        Some(func("QUANTILE_CONT", vec![expr, lit_float(fraction)]))
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_ansi(name)
    }
}
