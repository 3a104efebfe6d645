//! MySQL SQL dialect.
//!
//! MySQL differences from ANSI:
//! - Backtick identifier quoting (`` `name` ``)
//! - Boolean is TINYINT(1), returns 1/0
//! - `||` is logical OR by default (use CONCAT())
//! - No NULLS FIRST/LAST
//! - No DATE_TRUNC; buckets are built from DATE/DATE_FORMAT
//! - No percentile aggregate

use super::helpers;
use super::{SqlDialect, TimeGrain};
use crate::sql::expr::{func, lit_int, lit_str, Expr, ExprExt};

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn supports_concat_operator(&self) -> bool {
        false
    }

    fn supports_nulls_ordering(&self) -> bool {
        false
    }

    fn date_trunc(&self, grain: TimeGrain, expr: Expr) -> Expr {
        match grain {
            TimeGrain::Day => func("DATE", vec![expr]),
            // WEEKDAY() is 0 for Monday
            TimeGrain::Week => func(
                "SUBDATE",
                vec![
                    func("DATE", vec![expr.clone()]),
                    func("WEEKDAY", vec![expr]),
                ],
            ),
            TimeGrain::Month => func("DATE_FORMAT", vec![expr, lit_str("%Y-%m-01")]),
            TimeGrain::Quarter => {
                let first_month = func("QUARTER", vec![expr.clone()])
                    .sub(lit_int(1))
                    .paren()
                    .mul(lit_int(3))
                    .add(lit_int(1));
                func(
                    "CONCAT",
                    vec![
                        func("YEAR", vec![expr]),
                        lit_str("-"),
                        func("LPAD", vec![first_month, lit_int(2), lit_str("0")]),
                        lit_str("-01"),
                    ],
                )
            }
            TimeGrain::Year => func("DATE_FORMAT", vec![expr, lit_str("%Y-01-01")]),
        }
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }
}
