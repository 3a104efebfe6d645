//! SQLite dialect.
//!
//! - ANSI identifier quoting (`"`)
//! - Booleans are integers
//! - `?n` numbered bind parameters
//! - Date buckets via `DATE(x, modifiers...)`
//! - No percentile or standard deviation aggregates

use super::helpers;
use super::{SqlDialect, TimeGrain};
use crate::sql::expr::{func, lit_int, lit_str, Expr, ExprExt};

/// SQLite dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn format_placeholder(&self, n: usize) -> String {
        format!("?{}", n)
    }

    fn date_trunc(&self, grain: TimeGrain, expr: Expr) -> Expr {
        match grain {
            TimeGrain::Day => func("DATE", vec![expr]),
            // 'weekday 0' advances to Sunday; six days back is Monday
            TimeGrain::Week => func(
                "DATE",
                vec![expr, lit_str("weekday 0"), lit_str("-6 days")],
            ),
            TimeGrain::Month => func("DATE", vec![expr, lit_str("start of month")]),
            TimeGrain::Quarter => {
                let months_back = func("STRFTIME", vec![lit_str("%m"), expr.clone()])
                    .sub(lit_int(1))
                    .paren()
                    .modulo(lit_int(3))
                    .paren();
                let modifier = lit_str("-").concat(months_back).concat(lit_str(" months"));
                func("DATE", vec![expr, lit_str("start of month"), modifier])
            }
            TimeGrain::Year => func("DATE", vec![expr, lit_str("start of year")]),
        }
    }

    fn stddev_samp(&self, _expr: Expr) -> Option<Expr> {
        None
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_sqlite(name)
    }
}
