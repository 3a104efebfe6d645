//! Compilation of declarative queries to SQL.
//!
//! A query without window functions compiles to a single SELECT. With
//! window functions, the grouped/aggregated part is built first and wrapped
//! in a CTE named `base`; the outer SELECT applies the windows over its
//! output, since windows may reference aggregate aliases.

use tracing::debug;

use super::model::{
    resolve_output, same_column, split_reference, Aggregate, AggregateField, FilterOp, JoinKind,
    OrderBy, OutputItem, Predicate, PredicateValue, Query, SortDirection, WindowField,
    WindowFunction,
};
use crate::error::{PrismError, Result};
use crate::schema::{Column, Schema};
use crate::sql::{
    avg, col, count, count_distinct, count_star, dense_rank, func, lag, lead, lit_float, lit_int,
    lit_str, lit_value, max, min, rank, row_number, sum, table_col, Cte, Dialect, Expr, ExprExt,
    JoinType, Query as SqlQuery, SelectExpr, SqlDialect, TableRef, TimeGrain, WindowExt,
    WindowOrderBy,
};
use crate::value::Value;

/// Name of the CTE holding the base rows when windows are present.
const BASE_CTE: &str = "base";
const RESULT_CTE: &str = "result";

/// Escape character used in LIKE patterns. `\` is avoided because MySQL
/// treats it as a string escape.
const LIKE_ESCAPE: char = '!';

/// Compile a validated query against `table` for `dialect`.
///
/// Order statistics (median, percentiles, stddev) are emitted only where the
/// dialect computes them natively; otherwise this returns an `Execution`
/// error and the caller should take the fallback path.
pub fn compile_query(schema: &Schema, table: &str, query: &Query, dialect: Dialect) -> Result<String> {
    let compiler = Compiler::new(schema, table, query, dialect);
    let sql = compiler.build()?.to_sql(dialect);
    debug!(
        table,
        dialect = %dialect,
        windows = has_window_functions(query),
        "compiled query"
    );
    Ok(sql)
}

/// Whether the query uses an aggregate that some engines cannot compute
/// (median, p25, p75, stddev, percentile).
pub fn has_fallback_aggregates(query: &Query) -> bool {
    query.aggregates().any(|a| a.aggregate.is_order_statistic())
}

pub fn has_window_functions(query: &Query) -> bool {
    query.windows().next().is_some()
}

/// Whether `dialect` computes every aggregate of the query natively.
pub fn dialect_supports(query: &Query, dialect: Dialect) -> bool {
    query.aggregates().all(|agg| match agg.aggregate {
        Aggregate::Stddev => dialect.stddev_samp(col("x")).is_some(),
        _ => match agg.fraction() {
            Some(fraction) => dialect.percentile_cont(col("x"), fraction).is_some(),
            None => true,
        },
    })
}

/// SQL that pulls the raw rows the fallback aggregator needs: every
/// referenced column (aliased to its reference as written), with joins and
/// filters applied by the engine.
pub fn compile_pull_query(
    schema: &Schema,
    table: &str,
    query: &Query,
    dialect: Dialect,
) -> Result<String> {
    let compiler = Compiler::new(schema, table, query, dialect);
    Ok(compiler.pull_query().to_sql(dialect))
}

/// Column references the fallback needs from the engine, deduplicated in
/// first-use order.
pub(crate) fn needed_columns(query: &Query) -> Vec<&str> {
    let outputs = query.output_columns();
    let mut needed: Vec<&str> = Vec::new();

    for reference in query.columns() {
        push_unique(&mut needed, reference);
    }
    for agg in query.aggregates() {
        if agg.field != "*" {
            push_unique(&mut needed, &agg.field);
        }
    }
    for group in &query.group_by {
        push_unique(&mut needed, group.field());
    }
    for order in &query.order_by {
        if resolve_output(&order.field, &outputs).is_none() {
            push_unique(&mut needed, &order.field);
        }
    }
    needed
}

fn push_unique<'q>(needed: &mut Vec<&'q str>, reference: &'q str) {
    if !needed.contains(&reference) {
        needed.push(reference);
    }
}

struct Compiler<'a> {
    schema: &'a Schema,
    table: &'a str,
    query: &'a Query,
    dialect: Dialect,
}

impl<'a> Compiler<'a> {
    fn new(schema: &'a Schema, table: &'a str, query: &'a Query, dialect: Dialect) -> Self {
        Self {
            schema,
            table,
            query,
            dialect,
        }
    }

    fn build(&self) -> Result<SqlQuery> {
        let outputs = self.query.output_columns();
        let mut sql = if has_window_functions(self.query) {
            self.windowed_query()?
        } else {
            self.base_query()?
        };

        // Without NULLS FIRST/LAST the sort key is a CASE expression, which
        // cannot name a SELECT alias on every engine.
        let ordered_by_outputs = !self.query.order_by.is_empty()
            && self
                .query
                .order_by
                .iter()
                .all(|o| resolve_output(&o.field, &outputs).is_some());
        if ordered_by_outputs && !self.dialect.supports_nulls_ordering() {
            sql = result_cte(sql);
        }

        sql = sql.order_by(self.order_items(&self.query.order_by, &outputs));
        if let Some(limit) = self.query.limit {
            sql = sql.limit(limit);
        }
        Ok(sql)
    }

    // ========================================================================
    // Base query
    // ========================================================================

    fn base_query(&self) -> Result<SqlQuery> {
        let mut select: Vec<SelectExpr> = Vec::new();
        for item in self.query.output_items() {
            let name = item.name();
            let select_expr = match item {
                OutputItem::Column(reference) => {
                    let expr = reference_expr(reference);
                    if reference.contains('.') {
                        expr.alias(&name)
                    } else {
                        SelectExpr::new(expr)
                    }
                }
                OutputItem::Bucket { field, bucket } => self.bucket_expr(field, bucket).alias(&name),
                OutputItem::Aggregate(agg) => self.aggregate_expr(agg)?.alias(&name),
                OutputItem::Window(_) => continue,
            };
            select.push(select_expr);
        }

        let mut sql = self.from_clause(SqlQuery::new().select(select));

        if self.query.is_grouped() {
            sql = sql.group_by(self.group_exprs());
        }

        for predicate in &self.query.having {
            let agg = self
                .query
                .aggregates()
                .find(|a| a.alias == predicate.field)
                .ok_or_else(|| {
                    PrismError::validation(format!(
                        "HAVING field '{}' must reference an aggregate alias",
                        predicate.field
                    ))
                })?;
            sql = sql.having(predicate_expr(self.aggregate_expr(agg)?, predicate));
        }
        Ok(sql)
    }

    /// FROM, JOINs and WHERE, shared by the base and pull queries.
    fn from_clause(&self, mut sql: SqlQuery) -> SqlQuery {
        sql = sql.from(TableRef::new(self.table));
        for (i, join) in self.query.join.iter().enumerate() {
            let left = match split_reference(&join.on.left) {
                (Some(table), column) => table_col(table, column),
                (None, column) if i == 0 => table_col(self.table, column),
                (None, column) => col(column),
            };
            let right = match split_reference(&join.on.right) {
                (Some(table), column) => table_col(table, column),
                (None, column) => table_col(&join.table, column),
            };
            let join_type = match join.join_type {
                JoinKind::Inner => JoinType::Inner,
                JoinKind::Left => JoinType::Left,
            };
            sql = sql.join(join_type, TableRef::new(&join.table), left.eq(right));
        }
        for predicate in &self.query.filter {
            sql = sql.filter(predicate_expr(reference_expr(&predicate.field), predicate));
        }
        sql
    }

    /// Explicit group fields, then every pass-through column not already
    /// grouped.
    fn group_exprs(&self) -> Vec<Expr> {
        let mut exprs: Vec<Expr> = self
            .query
            .group_by
            .iter()
            .map(|group| match group.bucket() {
                Some(bucket) => self.bucket_expr(group.field(), bucket),
                None => reference_expr(group.field()),
            })
            .collect();

        for item in self.query.output_items() {
            if let OutputItem::Column(reference) = item {
                let grouped = self
                    .query
                    .group_by
                    .iter()
                    .any(|g| g.bucket().is_none() && same_column(g.field(), reference));
                if !grouped {
                    exprs.push(reference_expr(reference));
                }
            }
        }
        exprs
    }

    fn bucket_expr(&self, field: &str, bucket: TimeGrain) -> Expr {
        let integer_year =
            bucket == TimeGrain::Year && self.column(field).is_some_and(Column::is_integer_year);
        if integer_year {
            reference_expr(field)
        } else {
            self.dialect.date_trunc(bucket, reference_expr(field))
        }
    }

    fn aggregate_expr(&self, agg: &AggregateField) -> Result<Expr> {
        let value = || reference_expr(&agg.field);
        let unsupported = || {
            PrismError::Execution(format!(
                "Aggregate '{}' is not supported natively by {}; use the in-process fallback",
                agg.aggregate.as_str(),
                self.dialect
            ))
        };

        Ok(match agg.aggregate {
            Aggregate::Count if agg.field == "*" => count_star(),
            Aggregate::Count => count(value()),
            Aggregate::CountDistinct => count_distinct(value()),
            Aggregate::Sum => sum(value()),
            Aggregate::Avg => avg(value()),
            Aggregate::Min => min(value()),
            Aggregate::Max => max(value()),
            Aggregate::Stddev => self.dialect.stddev_samp(value()).ok_or_else(unsupported)?,
            Aggregate::Median | Aggregate::P25 | Aggregate::P75 | Aggregate::Percentile => {
                let fraction = agg.fraction().ok_or_else(|| {
                    PrismError::validation("Aggregate 'percentile' requires a 'percentile' value")
                })?;
                self.dialect
                    .percentile_cont(value(), fraction)
                    .ok_or_else(unsupported)?
            }
        })
    }

    fn column(&self, reference: &str) -> Option<&'a Column> {
        match split_reference(reference) {
            (Some(table), column) => self.schema.table(table)?.column(column),
            (None, column) => std::iter::once(self.table)
                .chain(self.query.join.iter().map(|j| j.table.as_str()))
                .filter_map(|name| self.schema.table(name))
                .find_map(|t| t.column(column)),
        }
    }

    // ========================================================================
    // Windows
    // ========================================================================

    fn windowed_query(&self) -> Result<SqlQuery> {
        let base_outputs = self.query.base_output_columns();
        let mut select: Vec<SelectExpr> = Vec::new();
        for item in self.query.output_items() {
            match item {
                OutputItem::Window(win) => {
                    select.push(self.window_expr(win, &base_outputs)?.alias(&win.alias))
                }
                other => select.push(SelectExpr::new(col(&other.name()))),
            }
        }

        Ok(SqlQuery::new()
            .with_cte(Cte::new(BASE_CTE, self.base_query()?))
            .select(select)
            .from(TableRef::new(BASE_CTE)))
    }

    fn window_expr(&self, win: &WindowField, base_outputs: &[String]) -> Result<Expr> {
        let output = |name: &str| col(resolve_output(name, base_outputs).unwrap_or(name));
        let partition: Vec<Expr> = win.partition_by.iter().map(|p| output(p)).collect();
        let order = self.order_items(&win.order_by, base_outputs);
        let value = || {
            win.field.as_deref().map(output).ok_or_else(|| {
                PrismError::validation(format!(
                    "Window function '{}' requires a 'field'",
                    win.window.as_str()
                ))
            })
        };
        let offset = win.offset.unwrap_or(1);
        let default = win.default.as_ref().map(lit_value);

        let function = match win.window {
            WindowFunction::Lag => lag(value()?, offset, default),
            WindowFunction::Lead => lead(value()?, offset, default),
            WindowFunction::Rank => rank(),
            WindowFunction::DenseRank => dense_rank(),
            WindowFunction::RowNumber => row_number(),
            WindowFunction::RunningSum | WindowFunction::RunningAvg => {
                let aggregate = if win.window == WindowFunction::RunningSum {
                    sum(value()?)
                } else {
                    avg(value()?)
                };
                return Ok(aggregate
                    .over()
                    .partition_by(partition)
                    .order_by(order)
                    .rows_to_current()
                    .build());
            }
            WindowFunction::PctOfTotal => {
                let v = value()?;
                let total = sum(v.clone()).over().partition_by(partition).build();
                return Ok(v
                    .mul(lit_float(100.0))
                    .div(func("NULLIF", vec![total, lit_int(0)])));
            }
        };
        Ok(function
            .over()
            .partition_by(partition)
            .order_by(order)
            .build())
    }

    /// ORDER BY items. Output names are referenced by name; anything else is
    /// a raw column. Ascending puts NULLs last, descending puts them first.
    fn order_items(&self, order_by: &[OrderBy], outputs: &[String]) -> Vec<WindowOrderBy> {
        order_by
            .iter()
            .map(|o| {
                let expr = match resolve_output(&o.field, outputs) {
                    Some(name) => col(name),
                    None => reference_expr(&o.field),
                };
                match o.direction {
                    SortDirection::Asc => WindowOrderBy::asc(expr).nulls_last(),
                    SortDirection::Desc => WindowOrderBy::desc(expr).nulls_first(),
                }
            })
            .collect()
    }

    // ========================================================================
    // Fallback pull query
    // ========================================================================

    fn pull_query(&self) -> SqlQuery {
        let mut select: Vec<SelectExpr> = needed_columns(self.query)
            .into_iter()
            .map(|reference| reference_expr(reference).alias(reference))
            .collect();
        if select.is_empty() {
            select.push(lit_int(1).alias("__row"));
        }
        self.from_clause(SqlQuery::new().select(select))
    }
}

/// `SELECT * FROM result` over `sql`, hoisting its CTEs so the WITH list
/// stays flat.
fn result_cte(mut sql: SqlQuery) -> SqlQuery {
    let mut outer = SqlQuery::new();
    for cte in std::mem::take(&mut sql.with) {
        outer = outer.with_cte(cte);
    }
    outer
        .with_cte(Cte::new(RESULT_CTE, sql))
        .select_star()
        .from(TableRef::new(RESULT_CTE))
}

/// `table.column` or `column` as a column expression.
fn reference_expr(reference: &str) -> Expr {
    match split_reference(reference) {
        (Some(table), column) => table_col(table, column),
        (None, column) => col(column),
    }
}

fn predicate_expr(target: Expr, predicate: &Predicate) -> Expr {
    let scalar = match &predicate.value {
        Some(PredicateValue::Scalar(v)) => v.clone(),
        _ => Value::Null,
    };
    let list: Vec<Value> = match &predicate.value {
        Some(PredicateValue::List(values)) => values.clone(),
        Some(PredicateValue::Scalar(v)) => vec![v.clone()],
        None => Vec::new(),
    };

    match predicate.op {
        FilterOp::Eq if scalar.is_null() => target.is_null(),
        FilterOp::Neq if scalar.is_null() => target.is_not_null(),
        FilterOp::Eq => target.eq(&scalar),
        FilterOp::Neq => target.ne(&scalar),
        FilterOp::Gt => target.gt(&scalar),
        FilterOp::Gte => target.gte(&scalar),
        FilterOp::Lt => target.lt(&scalar),
        FilterOp::Lte => target.lte(&scalar),
        FilterOp::In => target.in_list(list.iter().map(lit_value).collect()),
        FilterOp::NotIn => target.not_in_list(list.iter().map(lit_value).collect()),
        FilterOp::Contains => {
            let pattern = format!("%{}%", escape_like(&scalar.to_string()));
            target.like_escape(lit_str(&pattern), LIKE_ESCAPE)
        }
        FilterOp::Between => {
            let low = list.first().cloned().unwrap_or_default();
            let high = list.get(1).cloned().unwrap_or_default();
            target.between(&low, &high)
        }
        FilterOp::IsNull => target.is_null(),
        FilterOp::IsNotNull => target.is_not_null(),
    }
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if c == LIKE_ESCAPE || c == '%' || c == '_' {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(c);
    }
    escaped
}
