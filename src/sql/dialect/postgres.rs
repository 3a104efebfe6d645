//! PostgreSQL SQL dialect.
//!
//! PostgreSQL features:
//! - ANSI identifier quoting (`"`)
//! - Native boolean type (true/false)
//! - `$n` bind parameters
//! - Ordered-set aggregates: `PERCENTILE_CONT(p) WITHIN GROUP (ORDER BY x)`

use super::helpers;
use super::SqlDialect;
use crate::sql::expr::{lit_float, Expr, WindowOrderBy};

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
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

    fn percentile_cont(&self, expr: Expr, fraction: f64) -> Option<Expr> {
        Some(Expr::WithinGroup {
            name: "PERCENTILE_CONT".into(),
            args: vec![lit_float(fraction)],
            order_by: Box::new(WindowOrderBy::new(expr)),
        })
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_ansi(name)
    }
}
