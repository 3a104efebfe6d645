//! In-process aggregation for queries the engine cannot fully execute.
//!
//! The engine runs a pull query (joins and filters only); grouping,
//! aggregates, HAVING, windows, ORDER BY and LIMIT then run here with the
//! same semantics the compiled SQL has. The result carries exactly the
//! columns [`Query::output_columns`] names.
//!
//! NULL ordering: ascending puts NULLs last, descending puts NULLs first.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::compile::{compile_pull_query, needed_columns};
use super::model::{
    resolve_output, same_column, Aggregate, AggregateField, FilterOp, OrderBy, OutputItem,
    Predicate, PredicateValue, Query, SortDirection, WindowField, WindowFunction,
};
use crate::error::Result;
use crate::schema::Schema;
use crate::sql::{Dialect, TimeGrain};
use crate::storage::Storage;
use crate::stats::{mean, quantile, sample_sd};
use crate::value::{compare, safe_equal, ResultSet, Row, Value};

static NULL: Value = Value::Null;

/// Pull the needed rows through `storage` and aggregate them in-process.
pub fn execute_aggregate_fallback<S: Storage + ?Sized>(
    storage: &S,
    schema: &Schema,
    table: &str,
    query: &Query,
    dialect: Dialect,
) -> Result<ResultSet> {
    let pull = compile_pull_query(schema, table, query, dialect)?;
    debug!(sql = %pull, columns = ?pulled_columns(query), "fallback pull query");
    let pulled = storage.query(&pull)?;
    let result = aggregate_rows(&pulled.rows, query);
    info!(
        table,
        pulled = pulled.rows.len(),
        returned = result.rows.len(),
        "aggregated in-process"
    );
    Ok(result)
}

/// Aggregate rows keyed by column reference (as the pull query aliases
/// them). Filters are assumed to be applied already.
pub fn aggregate_rows(rows: &[Row], query: &Query) -> ResultSet {
    let columns = query.output_columns();

    let mut out: Vec<Row> = if query.is_grouped() {
        group_rows(rows, query)
    } else {
        rows.iter().map(|row| project_row(row, query)).collect()
    };

    out.retain(|row| {
        query
            .having
            .iter()
            .all(|p| predicate_matches(row.get(&p.field).unwrap_or(&NULL), p))
    });

    let base_outputs = query.base_output_columns();
    for window in query.windows() {
        apply_window(&mut out, window, &base_outputs);
    }

    sort_rows(&mut out, &query.order_by, &columns);
    if let Some(limit) = query.limit {
        out.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
    }

    let rows = out
        .into_iter()
        .map(|mut row| {
            columns
                .iter()
                .map(|c| (c.clone(), row.remove(c).unwrap_or_default()))
                .collect()
        })
        .collect();
    ResultSet::new(columns, rows)
}

// ============================================================================
// Grouping
// ============================================================================

/// A grouping key: the row key it is stored under and how to read it.
struct GroupKey<'q> {
    name: String,
    field: &'q str,
    bucket: Option<TimeGrain>,
}

impl GroupKey<'_> {
    fn value(&self, row: &Row) -> Value {
        let raw = row.get(self.field).unwrap_or(&NULL);
        match self.bucket {
            Some(bucket) => bucket_value(raw, bucket),
            None => raw.clone(),
        }
    }
}

/// Same keys the compiler emits in GROUP BY: explicit group fields, then
/// pass-through columns not already grouped.
fn group_keys(query: &Query) -> Vec<GroupKey<'_>> {
    let mut keys: Vec<GroupKey<'_>> = query
        .group_by
        .iter()
        .map(|g| GroupKey {
            name: match g.bucket() {
                Some(bucket) => super::model::bucket_alias(g.field(), bucket),
                None => g.field().to_string(),
            },
            field: g.field(),
            bucket: g.bucket(),
        })
        .collect();

    for item in query.output_items() {
        if let OutputItem::Column(reference) = item {
            let grouped = query
                .group_by
                .iter()
                .any(|g| g.bucket().is_none() && same_column(g.field(), reference));
            if !grouped {
                keys.push(GroupKey {
                    name: reference.to_string(),
                    field: reference,
                    bucket: None,
                });
            }
        }
    }
    keys
}

fn group_rows(rows: &[Row], query: &Query) -> Vec<Row> {
    let keys = group_keys(query);

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<&Row>> = HashMap::new();
    for row in rows {
        let key = keys
            .iter()
            .map(|k| k.value(row).group_key())
            .collect::<Vec<_>>()
            .join("\u{1f}");
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }
    // Ungrouped aggregates over zero rows still produce one row.
    if keys.is_empty() && order.is_empty() {
        order.push(String::new());
        groups.insert(String::new(), Vec::new());
    }

    let items = query.output_items();
    order
        .iter()
        .filter_map(|key| groups.get(key))
        .map(|members| {
            let mut out = Row::new();
            if let Some(first) = members.first() {
                for key in &keys {
                    out.insert(key.name.clone(), key.value(first));
                }
            }
            for item in &items {
                if let OutputItem::Aggregate(agg) = item {
                    out.insert(agg.alias.clone(), compute_aggregate(agg, members));
                }
            }
            out
        })
        .collect()
}

/// Ungrouped row: raw columns stay available for ordering, outputs are
/// added by name.
fn project_row(row: &Row, query: &Query) -> Row {
    let mut out = row.clone();
    for item in query.output_items() {
        if let OutputItem::Bucket { field, bucket } = item {
            let value = bucket_value(row.get(field).unwrap_or(&NULL), bucket);
            out.insert(item.name(), value);
        }
    }
    out
}

/// Truncate a date value to its bucket start as `YYYY-MM-DD`.
///
/// A `year` bucket over an integer year passes the value through.
pub fn bucket_value(value: &Value, bucket: TimeGrain) -> Value {
    if bucket == TimeGrain::Year {
        if let Value::Number(n) = value {
            if n.fract() == 0.0 && (1000.0..=9999.0).contains(n) {
                return value.clone();
            }
        }
    }
    match value.to_datetime() {
        Some(dt) => Value::Text(bucket.truncate(dt.date()).format("%Y-%m-%d").to_string()),
        None => Value::Null,
    }
}

// ============================================================================
// Aggregates
// ============================================================================

fn compute_aggregate(agg: &AggregateField, members: &[&Row]) -> Value {
    if agg.field == "*" {
        return Value::from(members.len() as i64);
    }
    let values: Vec<&Value> = members
        .iter()
        .map(|row| row.get(&agg.field).unwrap_or(&NULL))
        .filter(|v| !v.is_null())
        .collect();
    let numbers = || -> Vec<f64> { values.iter().filter_map(|v| v.to_number()).collect() };

    match agg.aggregate {
        Aggregate::Count => Value::from(values.len() as i64),
        Aggregate::CountDistinct => {
            let distinct: HashSet<String> = values.iter().map(|v| v.group_key()).collect();
            Value::from(distinct.len() as i64)
        }
        Aggregate::Min => extreme(&values, Ordering::Less),
        Aggregate::Max => extreme(&values, Ordering::Greater),
        Aggregate::Sum => {
            let numbers = numbers();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::number(numbers.iter().sum())
            }
        }
        Aggregate::Avg => mean(&numbers()).map_or(Value::Null, Value::number),
        Aggregate::Stddev => sample_sd(&numbers()).map_or(Value::Null, Value::number),
        Aggregate::Median | Aggregate::P25 | Aggregate::P75 | Aggregate::Percentile => {
            let mut numbers = numbers();
            numbers.sort_by(f64::total_cmp);
            agg.fraction()
                .and_then(|p| quantile(&numbers, p))
                .map_or(Value::Null, Value::number)
        }
    }
}

fn extreme(values: &[&Value], wanted: Ordering) -> Value {
    let mut best: Option<&Value> = None;
    for value in values {
        best = match best {
            Some(current) if compare(value, current) != Some(wanted) => Some(current),
            _ => Some(*value),
        };
    }
    best.cloned().unwrap_or_default()
}

// ============================================================================
// Predicates
// ============================================================================

/// Whether `value` satisfies `predicate`, with SQL null semantics: a null
/// only matches `is_null` or `eq null`, the same predicates the compiler
/// lowers to `IS NULL`.
pub fn predicate_matches(value: &Value, predicate: &Predicate) -> bool {
    let scalar = match &predicate.value {
        Some(PredicateValue::Scalar(v)) => v,
        _ => &NULL,
    };
    match predicate.op {
        FilterOp::IsNull => return value.is_null(),
        FilterOp::IsNotNull => return !value.is_null(),
        FilterOp::Eq if scalar.is_null() => return value.is_null(),
        FilterOp::Neq if scalar.is_null() => return !value.is_null(),
        _ => {}
    }
    if value.is_null() {
        return false;
    }

    let list: &[Value] = match &predicate.value {
        Some(PredicateValue::List(values)) => values,
        Some(PredicateValue::Scalar(v)) => std::slice::from_ref(v),
        None => &[],
    };
    let ordering = || compare(value, scalar);

    match predicate.op {
        FilterOp::Eq => safe_equal(value, scalar),
        FilterOp::Neq => !safe_equal(value, scalar),
        FilterOp::Gt => ordering() == Some(Ordering::Greater),
        FilterOp::Gte => matches!(ordering(), Some(Ordering::Greater | Ordering::Equal)),
        FilterOp::Lt => ordering() == Some(Ordering::Less),
        FilterOp::Lte => matches!(ordering(), Some(Ordering::Less | Ordering::Equal)),
        FilterOp::In => list.iter().any(|v| safe_equal(value, v)),
        FilterOp::NotIn => !list.iter().any(|v| safe_equal(value, v)),
        FilterOp::Contains => value.to_string().contains(&scalar.to_string()),
        FilterOp::Between => match list {
            [low, high] => {
                matches!(compare(value, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(value, high), Some(Ordering::Less | Ordering::Equal))
            }
            _ => false,
        },
        FilterOp::IsNull | FilterOp::IsNotNull => false,
    }
}

// ============================================================================
// Windows and ordering
// ============================================================================

/// Compare two values for ORDER BY: ascending puts NULLs last, descending
/// puts them first.
pub fn compare_for_order(a: &Value, b: &Value, direction: SortDirection) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => match direction {
            SortDirection::Asc => Ordering::Greater,
            SortDirection::Desc => Ordering::Less,
        },
        (false, true) => match direction {
            SortDirection::Asc => Ordering::Less,
            SortDirection::Desc => Ordering::Greater,
        },
        (false, false) => {
            let ord = compare(a, b).unwrap_or(Ordering::Equal);
            match direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        }
    }
}

fn order_keys(order_by: &[OrderBy], outputs: &[String]) -> Vec<(String, SortDirection)> {
    order_by
        .iter()
        .map(|o| {
            let key = resolve_output(&o.field, outputs).unwrap_or(o.field.as_str());
            (key.to_string(), o.direction)
        })
        .collect()
}

fn compare_rows(a: &Row, b: &Row, keys: &[(String, SortDirection)]) -> Ordering {
    keys.iter()
        .map(|(key, direction)| {
            compare_for_order(
                a.get(key).unwrap_or(&NULL),
                b.get(key).unwrap_or(&NULL),
                *direction,
            )
        })
        .find(|ord| *ord != Ordering::Equal)
        .unwrap_or(Ordering::Equal)
}

fn sort_rows(rows: &mut [Row], order_by: &[OrderBy], outputs: &[String]) {
    if order_by.is_empty() {
        return;
    }
    let keys = order_keys(order_by, outputs);
    rows.sort_by(|a, b| compare_rows(a, b, &keys));
}

fn apply_window(rows: &mut [Row], window: &WindowField, base_outputs: &[String]) {
    let key_of = |name: &String| {
        resolve_output(name, base_outputs)
            .unwrap_or(name.as_str())
            .to_string()
    };
    let partition_keys: Vec<String> = window.partition_by.iter().map(key_of).collect();
    let order = order_keys(&window.order_by, base_outputs);
    let field = window.field.as_ref().map(key_of);

    let mut partitions: Vec<Vec<usize>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let key = partition_keys
            .iter()
            .map(|k| row.get(k).unwrap_or(&NULL).group_key())
            .collect::<Vec<_>>()
            .join("\u{1f}");
        let slot = *index.entry(key).or_insert_with(|| {
            partitions.push(Vec::new());
            partitions.len() - 1
        });
        partitions[slot].push(i);
    }

    for mut members in partitions {
        members.sort_by(|a, b| compare_rows(&rows[*a], &rows[*b], &order));
        let values: Vec<Value> = members
            .iter()
            .map(|i| match &field {
                Some(f) => rows[*i].get(f).cloned().unwrap_or_default(),
                None => Value::Null,
            })
            .collect();
        let results = window_values(window, &members, rows, &order, &values);
        for (i, value) in members.iter().zip(results) {
            rows[*i].insert(window.alias.clone(), value);
        }
    }
}

fn window_values(
    window: &WindowField,
    members: &[usize],
    rows: &[Row],
    order: &[(String, SortDirection)],
    values: &[Value],
) -> Vec<Value> {
    let n = members.len();
    let peers = |a: usize, b: usize| {
        compare_rows(&rows[members[a]], &rows[members[b]], order) == Ordering::Equal
    };

    match window.window {
        WindowFunction::RowNumber => (1..=n).map(|i| Value::from(i as i64)).collect(),
        WindowFunction::Rank => {
            let mut out = Vec::with_capacity(n);
            let mut current = 1;
            for i in 0..n {
                if i > 0 && !peers(i - 1, i) {
                    current = i + 1;
                }
                out.push(Value::from(current as i64));
            }
            out
        }
        WindowFunction::DenseRank => {
            let mut out = Vec::with_capacity(n);
            let mut current = 1;
            for i in 0..n {
                if i > 0 && !peers(i - 1, i) {
                    current += 1;
                }
                out.push(Value::from(current as i64));
            }
            out
        }
        WindowFunction::Lag | WindowFunction::Lead => {
            let offset = window.offset.unwrap_or(1);
            let step = if window.window == WindowFunction::Lag {
                offset.saturating_neg()
            } else {
                offset
            };
            let default = window.default.clone().unwrap_or_default();
            (0..n)
                .map(|i| {
                    match (i as i64).checked_add(step) {
                        Some(target) if (0..n as i64).contains(&target) => {
                            values[target as usize].clone()
                        }
                        _ => default.clone(),
                    }
                })
                .collect()
        }
        WindowFunction::RunningSum | WindowFunction::RunningAvg => {
            let mut total = 0.0;
            let mut count = 0usize;
            values
                .iter()
                .map(|v| {
                    if let Some(x) = v.to_number() {
                        total += x;
                        count += 1;
                    }
                    match (count, window.window) {
                        (0, _) => Value::Null,
                        (_, WindowFunction::RunningSum) => Value::number(total),
                        _ => Value::number(total / count as f64),
                    }
                })
                .collect()
        }
        WindowFunction::PctOfTotal => {
            let numbers: Vec<f64> = values.iter().filter_map(Value::to_number).collect();
            let total: f64 = numbers.iter().sum();
            values
                .iter()
                .map(|v| match v.to_number() {
                    Some(x) if !numbers.is_empty() && total != 0.0 => {
                        Value::number(x * 100.0 / total)
                    }
                    _ => Value::Null,
                })
                .collect()
        }
    }
}

/// The columns the pull query fetches, keyed as the pulled rows are.
pub fn pulled_columns(query: &Query) -> Vec<String> {
    needed_columns(query).into_iter().map(String::from).collect()
}
