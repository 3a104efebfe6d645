//! SQL dialect definitions and formatting rules.
//!
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (PG/DuckDB/SQLite), `` ` `` (MySQL), `[]` (T-SQL)
//! - Pagination: LIMIT/OFFSET vs OFFSET FETCH
//! - Boolean literals: true/false vs 1/0
//! - Date truncation: `DATE_TRUNC`, `DATETRUNC`, `DATE(x, modifiers)`, ...
//! - Ordered-set aggregates and sample standard deviation
//!
//! # Usage
//!
//! ```
//! use prism::sql::dialect::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::TSql;
//! assert_eq!(dialect.quote_identifier("user"), "[user]");
//! ```
//!
//! # Capability matrix
//!
//! | Feature | DuckDB | PostgreSQL | MySQL | T-SQL | SQLite |
//! |---------|--------|------------|-------|-------|--------|
//! | NULLS FIRST/LAST | ✓ | ✓ | CASE key | CASE key | 3.30+ |
//! | Median / percentile aggregate | ✓ | ✓ | ❌ | ❌ | ❌ |
//! | Sample standard deviation | ✓ | ✓ | ✓ | ✓ (`STDEV`) | ❌ |
//! | Window functions | ✓ | 8.4+ | 8.0+ | 2005+ | 3.25+ |
//!
//! Aggregates marked ❌ are rejected at compile time; callers route those
//! queries to the in-process fallback.

mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod sqlite;
mod tsql;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;
pub use tsql::TSql;

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

use super::expr::{func, lit_str, Expr};
use super::token::TokenStream;

/// Calendar unit for time bucketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGrain::Day => "day",
            TimeGrain::Week => "week",
            TimeGrain::Month => "month",
            TimeGrain::Quarter => "quarter",
            TimeGrain::Year => "year",
        }
    }

    /// First day of the bucket containing `date`. Weeks start on Monday.
    pub fn truncate(&self, date: NaiveDate) -> NaiveDate {
        let first_of = |year: i32, month: u32| NaiveDate::from_ymd_opt(year, month, 1);
        let truncated = match self {
            TimeGrain::Day => Some(date),
            TimeGrain::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday()))),
            TimeGrain::Month => first_of(date.year(), date.month()),
            TimeGrain::Quarter => first_of(date.year(), (date.month0() / 3) * 3 + 1),
            TimeGrain::Year => first_of(date.year(), 1),
        };
        truncated.unwrap_or(date)
    }
}

impl fmt::Display for TimeGrain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal, doubling embedded single quotes.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    fn format_bool(&self, b: bool) -> &'static str;

    /// Positional bind parameter (1-based).
    fn format_placeholder(&self, _n: usize) -> String {
        "?".into()
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    /// Whether this dialect requires ORDER BY for OFFSET/LIMIT.
    fn requires_order_by_for_offset(&self) -> bool {
        false
    }

    // =========================================================================
    // Operators
    // =========================================================================

    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// MySQL parses `||` as logical OR, so concatenation becomes `CONCAT()`.
    fn supports_concat_operator(&self) -> bool {
        true
    }

    // =========================================================================
    // Ordering
    // =========================================================================

    /// Whether this dialect supports NULLS FIRST/LAST in ORDER BY. Without
    /// it, ORDER BY items that ask for a NULLS position get a leading
    /// `CASE WHEN x IS NULL` sort key instead.
    fn supports_nulls_ordering(&self) -> bool {
        true
    }

    // =========================================================================
    // Dates and aggregates
    // =========================================================================

    /// Truncate a date or timestamp expression to the start of its bucket.
    fn date_trunc(&self, grain: TimeGrain, expr: Expr) -> Expr {
        func("DATE_TRUNC", vec![lit_str(grain.as_str()), expr])
    }

    /// Continuous percentile aggregate, `fraction` in `[0, 1]`.
    ///
    /// `None` when the dialect has no aggregate form.
    fn percentile_cont(&self, expr: Expr, fraction: f64) -> Option<Expr> {
        let _ = (expr, fraction);
        None
    }

    /// Sample standard deviation aggregate.
    fn stddev_samp(&self, expr: Expr) -> Option<Expr> {
        Some(func("STDDEV_SAMP", vec![expr]))
    }

    // =========================================================================
    // Function Remapping
    // =========================================================================

    /// Remap a function name for this dialect, matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    DuckDb,
    Postgres,
    MySql,
    TSql,
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 5] = [
        Dialect::DuckDb,
        Dialect::Postgres,
        Dialect::MySql,
        Dialect::TSql,
        Dialect::Sqlite,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Postgres => &Postgres,
            Dialect::MySql => &MySql,
            Dialect::TSql => &TSql,
            Dialect::Sqlite => &Sqlite,
        }
    }
}

// Delegate to the concrete dialect types.
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn format_placeholder(&self, n: usize) -> String {
        self.dialect().format_placeholder(n)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        self.dialect().requires_order_by_for_offset()
    }

    fn concat_operator(&self) -> &'static str {
        self.dialect().concat_operator()
    }

    fn supports_concat_operator(&self) -> bool {
        self.dialect().supports_concat_operator()
    }

    fn supports_nulls_ordering(&self) -> bool {
        self.dialect().supports_nulls_ordering()
    }

    fn date_trunc(&self, grain: TimeGrain, expr: Expr) -> Expr {
        self.dialect().date_trunc(grain, expr)
    }

    fn percentile_cont(&self, expr: Expr, fraction: f64) -> Option<Expr> {
        self.dialect().percentile_cont(expr, fraction)
    }

    fn stddev_samp(&self, expr: Expr) -> Option<Expr> {
        self.dialect().stddev_samp(expr)
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            "tsql" | "mssql" | "sqlserver" => Ok(Dialect::TSql),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(format!(
                "Unknown dialect '{}'. Expected one of: duckdb, postgres, mysql, tsql, sqlite",
                other
            )),
        }
    }
}
