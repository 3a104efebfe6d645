//! SQL generation module.
//!
//! A type-safe SQL builder that generates multi-dialect SQL:
//!
//! - [`query`] - SELECT query builder with CTEs
//! - [`expr`] - Expression AST and builder DSL
//! - [`statement`] - ALTER TABLE / UPDATE for column materialization
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod dialect;
pub mod expr;
pub mod query;
pub mod statement;
pub mod token;

#[cfg(test)]
pub mod test_utils;

pub use dialect::{Dialect, SqlDialect, TimeGrain};
pub use expr::{
    avg, case_when, col, count, count_distinct, count_star, dense_rank, func, lag, lead, lit_bool,
    lit_float, lit_int, lit_null, lit_str, lit_value, max, min, placeholder, rank, row_number,
    star, sum, table_col, BinaryOperator, Expr, ExprExt, Literal, NullsOrder, SortDir,
    UnaryOperator, WindowExt, WindowFrame, WindowOrderBy,
};
pub use query::{Cte, Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, TableRef};
pub use statement::{AlterAction, AlterTable, ColumnAffinity, Update};
pub use token::{Token, TokenStream};
