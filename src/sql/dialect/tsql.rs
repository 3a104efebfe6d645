//! T-SQL (SQL Server / Azure SQL) dialect.
//!
//! T-SQL has significant differences from ANSI:
//! - Square bracket identifier quoting (`[name]`)
//! - No native boolean in SELECT (1/0)
//! - OFFSET FETCH for pagination (requires ORDER BY)
//! - N'...' prefix for Unicode strings
//! - String concatenation with `+`
//! - `DATETRUNC(unit, x)` (SQL Server 2022)
//! - `STDEV` for sample standard deviation; PERCENTILE_CONT is window-only

use super::helpers;
use super::{SqlDialect, TimeGrain};
use crate::sql::expr::{func, Expr};
use crate::sql::token::TokenStream;

/// T-SQL (SQL Server) dialect.
#[derive(Debug, Clone, Copy)]
pub struct TSql;

impl SqlDialect for TSql {
    fn name(&self) -> &'static str {
        "tsql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        if !s.is_ascii() {
            helpers::quote_string_unicode(s)
        } else {
            helpers::quote_string_single(s)
        }
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn format_placeholder(&self, n: usize) -> String {
        format!("@p{}", n)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_tsql(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        true
    }

    fn concat_operator(&self) -> &'static str {
        "+"
    }

    fn supports_nulls_ordering(&self) -> bool {
        // NULLS FIRST/LAST is not available before SQL Server 2022
        false
    }

    fn date_trunc(&self, grain: TimeGrain, expr: Expr) -> Expr {
        let unit = match grain {
            TimeGrain::Week => "iso_week",
            other => other.as_str(),
        };
        func("DATETRUNC", vec![Expr::Raw(unit.into()), expr])
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_tsql(name)
    }
}
