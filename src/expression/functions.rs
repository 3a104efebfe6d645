//! Function catalogue and implementations.
//!
//! Row-wise functions see the evaluated arguments of one row. Column-wise
//! functions (`col_*`, `zscore`, `center`, `rank`, `percentile_rank`,
//! `ntile`) need every participating value of their argument at once and
//! are computed by [`call_column`] before rows are evaluated.
//!
//! Bad data never fails: out-of-domain input (log of a negative, an
//! unparsable date, a null operand) produces null.

use chrono::{Datelike, NaiveDateTime, Timelike};

use super::inference::ValueType;
use crate::stats::{mean, quantile, sample_sd};
use crate::error::{PrismError, Result};
use crate::fuzzy::{did_you_mean, suggest, DEFAULT_THRESHOLD};
use crate::sql::TimeGrain;
use crate::value::{compare, format_number, safe_equal, Value};

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Row,
    Column,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    pub kind: FunctionKind,
    /// Fixed result type; `None` when it depends on the arguments.
    pub returns: Option<ValueType>,
}

const NUMERIC: Option<ValueType> = Some(ValueType::Numeric);
const TEXT: Option<ValueType> = Some(ValueType::Categorical);
const BOOL: Option<ValueType> = Some(ValueType::Boolean);
const DATE: Option<ValueType> = Some(ValueType::Date);

const fn row(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    returns: Option<ValueType>,
) -> FunctionSpec {
    FunctionSpec {
        name,
        min_args,
        max_args,
        kind: FunctionKind::Row,
        returns,
    }
}

const fn column(name: &'static str, args: usize) -> FunctionSpec {
    FunctionSpec {
        name,
        min_args: args,
        max_args: Some(args),
        kind: FunctionKind::Column,
        returns: NUMERIC,
    }
}

pub static CATALOGUE: &[FunctionSpec] = &[
    // math
    row("log", 1, Some(1), NUMERIC),
    row("log10", 1, Some(1), NUMERIC),
    row("log2", 1, Some(1), NUMERIC),
    row("sqrt", 1, Some(1), NUMERIC),
    row("abs", 1, Some(1), NUMERIC),
    row("round", 1, Some(2), NUMERIC),
    row("ceil", 1, Some(1), NUMERIC),
    row("floor", 1, Some(1), NUMERIC),
    row("exp", 1, Some(1), NUMERIC),
    // across the row's own arguments
    row("row_mean", 1, None, NUMERIC),
    row("row_sum", 1, None, NUMERIC),
    row("row_min", 1, None, NUMERIC),
    row("row_max", 1, None, NUMERIC),
    row("row_sd", 1, None, NUMERIC),
    row("row_count_null", 1, None, NUMERIC),
    row("row_count_valid", 1, None, NUMERIC),
    // conditionals
    row("if_else", 3, Some(3), None),
    row("case", 2, None, None),
    row("coalesce", 1, None, None),
    row("is_null", 1, Some(1), BOOL),
    row("fill_null", 2, Some(2), None),
    row("null_if", 2, Some(2), None),
    row("in", 2, None, BOOL),
    row("between", 3, Some(3), BOOL),
    // strings
    row("upper", 1, Some(1), TEXT),
    row("lower", 1, Some(1), TEXT),
    row("trim", 1, Some(1), TEXT),
    row("length", 1, Some(1), NUMERIC),
    row("concat", 1, None, TEXT),
    row("substr", 2, Some(3), TEXT),
    row("replace", 3, Some(3), TEXT),
    row("contains", 2, Some(2), BOOL),
    row("starts_with", 2, Some(2), BOOL),
    row("ends_with", 2, Some(2), BOOL),
    row("to_string", 1, Some(1), TEXT),
    row("to_number", 1, Some(1), NUMERIC),
    // dates
    row("date_diff", 2, Some(3), NUMERIC),
    row("date_part", 2, Some(2), NUMERIC),
    row("date_floor", 2, Some(2), DATE),
    // recoding
    row("recode", 3, None, None),
    row("cut", 2, Some(3), TEXT),
    // column-wise
    column("col_mean", 1),
    column("col_sd", 1),
    column("col_min", 1),
    column("col_max", 1),
    column("col_median", 1),
    column("zscore", 1),
    column("center", 1),
    column("rank", 1),
    column("percentile_rank", 1),
    column("ntile", 2),
];

impl FunctionSpec {
    pub fn is_column_wise(&self) -> bool {
        self.kind == FunctionKind::Column
    }

    pub fn check_arity(&self, given: usize) -> Result<()> {
        let ok = given >= self.min_args && self.max_args.map_or(true, |max| given <= max);
        if ok {
            return Ok(());
        }
        let expected = match self.max_args {
            Some(max) if max == self.min_args => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        };
        Err(PrismError::Evaluation(format!(
            "Function '{}' expects {} argument{}, got {}",
            self.name,
            expected,
            if expected == "1" { "" } else { "s" },
            given
        )))
    }
}

/// Catalogue entry for `name`, ignoring ASCII case.
pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    CATALOGUE.iter().find(|f| f.name.eq_ignore_ascii_case(name))
}

/// Like [`lookup`], failing with a suggestion for unknown names.
pub fn resolve(name: &str) -> Result<&'static FunctionSpec> {
    lookup(name).ok_or_else(|| {
        let suggestion = suggest(name, CATALOGUE.iter().map(|f| f.name), DEFAULT_THRESHOLD);
        PrismError::Evaluation(format!(
            "Unknown function '{}'.{}",
            name,
            did_you_mean(suggestion.as_deref())
        ))
    })
}

/// An evaluated call argument. Array literals stay lists.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Scalar(Value),
    List(Vec<Value>),
}

impl Arg {
    /// Scalar view; a list reads as null.
    pub fn value(&self) -> &Value {
        match self {
            Arg::Scalar(v) => v,
            Arg::List(_) => &NULL,
        }
    }

    fn number(&self) -> Option<f64> {
        self.value().to_number()
    }

    fn text(&self) -> Option<String> {
        match self.value() {
            Value::Null => None,
            v => Some(v.to_string()),
        }
    }

    /// All values, flattening a list.
    fn items(&self) -> Vec<&Value> {
        match self {
            Arg::Scalar(v) => vec![v],
            Arg::List(items) => items.iter().collect(),
        }
    }
}

fn arg(args: &[Arg], index: usize) -> &Value {
    args.get(index).map_or(&NULL, Arg::value)
}

fn math(args: &[Arg], f: impl Fn(f64) -> Option<f64>) -> Value {
    args.first()
        .and_then(Arg::number)
        .and_then(f)
        .map_or(Value::Null, Value::number)
}

fn text_op(args: &[Arg], f: impl Fn(String) -> Value) -> Value {
    args.first().and_then(Arg::text).map_or(Value::Null, f)
}

fn text_pair(args: &[Arg], f: impl Fn(&str, &str) -> bool) -> Value {
    match (args.first().and_then(Arg::text), args.get(1).and_then(Arg::text)) {
        (Some(s), Some(needle)) => Value::Bool(f(&s, &needle)),
        _ => Value::Null,
    }
}

fn row_numbers(args: &[Arg]) -> Vec<f64> {
    args.iter()
        .flat_map(Arg::items)
        .filter_map(Value::to_number)
        .collect()
}

/// Evaluate a row-wise function. Names are catalogue names; anything else
/// yields null.
pub fn call_row(name: &str, args: &[Arg]) -> Value {
    match name {
        "log" => math(args, |x| (x > 0.0).then(|| x.ln())),
        "log10" => math(args, |x| (x > 0.0).then(|| x.log10())),
        "log2" => math(args, |x| (x > 0.0).then(|| x.log2())),
        "sqrt" => math(args, |x| (x >= 0.0).then(|| x.sqrt())),
        "abs" => math(args, |x| Some(x.abs())),
        "ceil" => math(args, |x| Some(x.ceil())),
        "floor" => math(args, |x| Some(x.floor())),
        "exp" => math(args, |x| Some(x.exp())),
        "round" => {
            let digits = args.get(1).and_then(Arg::number).unwrap_or(0.0) as i32;
            let factor = 10f64.powi(digits);
            math(args, |x| Some((x * factor).round() / factor))
        }

        "row_mean" => mean(&row_numbers(args)).into(),
        "row_sum" => {
            let numbers = row_numbers(args);
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::number(numbers.iter().sum())
            }
        }
        "row_min" => row_numbers(args).into_iter().reduce(f64::min).into(),
        "row_max" => row_numbers(args).into_iter().reduce(f64::max).into(),
        "row_sd" => sample_sd(&row_numbers(args)).into(),
        "row_count_null" => {
            let nulls = args.iter().flat_map(Arg::items).filter(|v| v.is_null()).count();
            Value::from(nulls as i64)
        }
        "row_count_valid" => {
            let valid = args.iter().flat_map(Arg::items).filter(|v| !v.is_null()).count();
            Value::from(valid as i64)
        }

        "if_else" => {
            if arg(args, 0).is_truthy() {
                arg(args, 1).clone()
            } else {
                arg(args, 2).clone()
            }
        }
        "case" => {
            for pair in args.chunks(2) {
                match pair {
                    [condition, result] if condition.value().is_truthy() => {
                        return result.value().clone()
                    }
                    [default] => return default.value().clone(),
                    _ => {}
                }
            }
            Value::Null
        }
        "coalesce" => args
            .iter()
            .map(Arg::value)
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or_default(),
        "is_null" => Value::Bool(arg(args, 0).is_null()),
        "fill_null" => {
            let value = arg(args, 0);
            if value.is_null() {
                arg(args, 1).clone()
            } else {
                value.clone()
            }
        }
        "null_if" => {
            let value = arg(args, 0);
            if safe_equal(value, arg(args, 1)) {
                Value::Null
            } else {
                value.clone()
            }
        }
        "in" => {
            let needle = arg(args, 0);
            let found = args
                .get(1..)
                .unwrap_or_default()
                .iter()
                .flat_map(Arg::items)
                .any(|candidate| safe_equal(needle, candidate));
            Value::Bool(found)
        }
        "between" => {
            let value = arg(args, 0);
            match (compare(value, arg(args, 1)), compare(value, arg(args, 2))) {
                (Some(low), Some(high)) => Value::Bool(low.is_ge() && high.is_le()),
                _ => Value::Null,
            }
        }

        "upper" => text_op(args, |s| Value::Text(s.to_uppercase())),
        "lower" => text_op(args, |s| Value::Text(s.to_lowercase())),
        "trim" => text_op(args, |s| Value::Text(s.trim().to_string())),
        "length" => text_op(args, |s| Value::from(s.chars().count() as i64)),
        "to_string" => text_op(args, Value::Text),
        "to_number" => arg(args, 0).to_number().into(),
        "concat" => Value::Text(args.iter().filter_map(Arg::text).collect::<String>()),
        "substr" => substr(args),
        "replace" => {
            match (
                args.first().and_then(Arg::text),
                args.get(1).and_then(Arg::text),
                args.get(2).and_then(Arg::text),
            ) {
                (Some(s), Some(from), _) if from.is_empty() => Value::Text(s),
                (Some(s), Some(from), to) => Value::Text(s.replace(&from, &to.unwrap_or_default())),
                _ => Value::Null,
            }
        }
        "contains" => text_pair(args, |s, needle| s.contains(needle)),
        "starts_with" => text_pair(args, |s, prefix| s.starts_with(prefix)),
        "ends_with" => text_pair(args, |s, suffix| s.ends_with(suffix)),

        "date_diff" => date_diff(args),
        "date_part" => date_part(args),
        "date_floor" => date_floor(args),

        "recode" => recode(args),
        "cut" => cut(args),

        _ => Value::Null,
    }
}

/// `substr(s, start, length?)` with a zero-based character start.
fn substr(args: &[Arg]) -> Value {
    let (Some(s), Some(start)) = (args.first().and_then(Arg::text), args.get(1).and_then(Arg::number))
    else {
        return Value::Null;
    };
    let start = start.max(0.0) as usize;
    let chars = s.chars().skip(start);
    let taken: String = match args.get(2).and_then(Arg::number) {
        Some(length) => chars.take(length.max(0.0) as usize).collect(),
        None => chars.collect(),
    };
    Value::Text(taken)
}

fn datetime(args: &[Arg], index: usize) -> Option<NaiveDateTime> {
    arg(args, index).to_datetime()
}

fn unit(args: &[Arg], index: usize, default: &str) -> String {
    args.get(index)
        .and_then(Arg::text)
        .unwrap_or_else(|| default.to_string())
        .to_lowercase()
        .trim_end_matches('s')
        .to_string()
}

/// `date_diff(end, start, unit = 'day')`: whole units from `start` to `end`.
///
/// Fixed-length units truncate the elapsed time toward zero. Months,
/// quarters and years subtract calendar fields, so Jan 31 to Feb 1 is one
/// month.
fn date_diff(args: &[Arg]) -> Value {
    let (Some(end), Some(start)) = (datetime(args, 0), datetime(args, 1)) else {
        return Value::Null;
    };
    let months = || {
        i64::from(end.year() - start.year()) * 12 + i64::from(end.month()) - i64::from(start.month())
    };
    let elapsed = end - start;
    let diff = match unit(args, 2, "day").as_str() {
        "second" => elapsed.num_seconds(),
        "minute" => elapsed.num_minutes(),
        "hour" => elapsed.num_hours(),
        "day" => elapsed.num_days(),
        "week" => elapsed.num_weeks(),
        "month" => months(),
        "quarter" => months() / 3,
        "year" => i64::from(end.year() - start.year()),
        _ => return Value::Null,
    };
    Value::from(diff)
}

fn date_part(args: &[Arg]) -> Value {
    let Some(dt) = datetime(args, 0) else {
        return Value::Null;
    };
    let part = match unit(args, 1, "").as_str() {
        "year" => dt.year() as i64,
        "quarter" => i64::from(dt.month0() / 3 + 1),
        "month" => i64::from(dt.month()),
        "week" => i64::from(dt.iso_week().week()),
        "day" => i64::from(dt.day()),
        "dow" => i64::from(dt.weekday().num_days_from_sunday()),
        "doy" => i64::from(dt.ordinal()),
        "hour" => i64::from(dt.hour()),
        "minute" => i64::from(dt.minute()),
        "second" => i64::from(dt.second()),
        _ => return Value::Null,
    };
    Value::from(part)
}

fn date_floor(args: &[Arg]) -> Value {
    let Some(dt) = datetime(args, 0) else {
        return Value::Null;
    };
    let grain = match unit(args, 1, "").as_str() {
        "hour" => return Value::Text(dt.format("%Y-%m-%d %H:00:00").to_string()),
        "minute" => return Value::Text(dt.format("%Y-%m-%d %H:%M:00").to_string()),
        "day" => TimeGrain::Day,
        "week" => TimeGrain::Week,
        "month" => TimeGrain::Month,
        "quarter" => TimeGrain::Quarter,
        "year" => TimeGrain::Year,
        _ => return Value::Null,
    };
    Value::Text(grain.truncate(dt.date()).format("%Y-%m-%d").to_string())
}

/// `recode(x, from1, to1, from2, to2, ..., default?)`: first matching key
/// wins; without a match the default applies, or `x` is kept.
fn recode(args: &[Arg]) -> Value {
    let value = arg(args, 0);
    let rest = args.get(1..).unwrap_or_default();
    for pair in rest.chunks(2) {
        match pair {
            [key, replacement] if safe_equal(value, key.value()) => {
                return replacement.value().clone()
            }
            [default] => return default.value().clone(),
            _ => {}
        }
    }
    value.clone()
}

/// `cut(x, [b0, b1, ..., bn], [labels]?)`: intervals `[b(i), b(i+1))`, the
/// last one closed on both ends. Values outside the breaks are null.
/// Default labels read `"b(i)-b(i+1)"`.
fn cut(args: &[Arg]) -> Value {
    let Some(x) = args.first().and_then(Arg::number) else {
        return Value::Null;
    };
    let mut breaks: Vec<f64> = match args.get(1) {
        Some(Arg::List(items)) => items.iter().filter_map(Value::to_number).collect(),
        _ => return Value::Null,
    };
    breaks.sort_by(f64::total_cmp);
    breaks.dedup();
    if breaks.len() < 2 {
        return Value::Null;
    }
    let last = breaks.len() - 2;
    let index = breaks.windows(2).enumerate().position(|(i, bounds)| {
        x >= bounds[0] && (x < bounds[1] || (i == last && x <= bounds[1]))
    });
    let Some(index) = index else {
        return Value::Null;
    };
    match args.get(2) {
        Some(Arg::List(labels)) if labels.len() == breaks.len() - 1 => labels[index].clone(),
        _ => Value::Text(format!(
            "{}-{}",
            format_number(breaks[index]),
            format_number(breaks[index + 1])
        )),
    }
}

/// Evaluate a column-wise function over the participating values of one
/// partition. Returns one value per input, in input order; nulls stay null.
/// `buckets` is the `ntile` bucket count.
pub fn call_column(name: &str, values: &[Value], buckets: usize) -> Vec<Value> {
    let numbers: Vec<Option<f64>> = values.iter().map(Value::to_number).collect();
    let present: Vec<f64> = numbers.iter().flatten().copied().collect();
    let mut sorted = present.clone();
    sorted.sort_by(f64::total_cmp);

    let broadcast = |value: Option<f64>| vec![Value::from(value); values.len()];
    let per_value = |f: &dyn Fn(f64) -> Option<f64>| -> Vec<Value> {
        numbers
            .iter()
            .map(|n| n.and_then(f).map_or(Value::Null, Value::number))
            .collect()
    };

    match name {
        "col_mean" => broadcast(mean(&present)),
        "col_sd" => broadcast(sample_sd(&present)),
        "col_min" => broadcast(sorted.first().copied()),
        "col_max" => broadcast(sorted.last().copied()),
        "col_median" => broadcast(quantile(&sorted, 0.5)),
        "center" => {
            let m = mean(&present);
            per_value(&|x| m.map(|m| x - m))
        }
        "zscore" => {
            let m = mean(&present);
            let sd = sample_sd(&present).filter(|sd| *sd > 0.0);
            per_value(&|x| Some((x - m?) / sd?))
        }
        "rank" => {
            let mut distinct = sorted.clone();
            distinct.dedup();
            per_value(&|x| {
                distinct
                    .binary_search_by(|probe| probe.total_cmp(&x))
                    .ok()
                    .map(|i| (i + 1) as f64)
            })
        }
        "percentile_rank" => {
            let n = sorted.len();
            per_value(&|x| {
                if n <= 1 {
                    return Some(0.0);
                }
                let below = sorted.partition_point(|v| *v < x);
                Some(below as f64 / (n - 1) as f64)
            })
        }
        "ntile" => ntile(&numbers, buckets),
        _ => vec![Value::Null; values.len()],
    }
}

/// Bucket `1..=buckets` by sorted position: `floor(i * buckets / n) + 1`.
/// Ties keep input order.
fn ntile(numbers: &[Option<f64>], buckets: usize) -> Vec<Value> {
    let mut order: Vec<(usize, f64)> = numbers
        .iter()
        .enumerate()
        .filter_map(|(i, n)| n.map(|n| (i, n)))
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));

    let count = order.len();
    let mut out = vec![Value::Null; numbers.len()];
    for (position, (index, _)) in order.into_iter().enumerate() {
        let bucket = position * buckets / count + 1;
        out[index] = Value::from(bucket as i64);
    }
    out
}
