//! Expression evaluation over a set of rows.
//!
//! Evaluation runs in three passes:
//!
//! 1. **Check**: every column reference must exist (with a suggestion when
//!    it does not), every function must be known and called with a valid
//!    number of arguments.
//! 2. **Precompute**: each column-wise call is computed once over the rows
//!    that pass the filter, per partition, innermost calls first.
//! 3. **Rows**: the tree is evaluated per row, reading precomputed results.
//!    Rows rejected by the filter get null.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ast::{AstNode, BinaryOp, UnaryOp};
use super::functions::{self, call_column, call_row, Arg};
use super::inference::{collect_warnings, infer_type, EvalStats, ValueType};
use super::parser::parse;
use crate::config::EvaluationSettings;
use crate::error::{PrismError, Result};
use crate::fuzzy::{did_you_mean, suggest, DEFAULT_THRESHOLD};
use crate::value::{compare, safe_equal, Row, Value};

/// Options for [`evaluate_expression`].
#[derive(Debug, Clone, PartialEq)]
pub struct EvalOptions {
    /// Only rows where this expression is truthy are evaluated.
    pub filter: Option<String>,
    /// Column-wise functions are computed per distinct value of this column.
    pub partition_by: Option<String>,
    /// Null fraction above which a warning is emitted.
    pub null_ratio_warning: f64,
    /// Columns that may be referenced. Defaults to every key seen in the rows.
    pub columns: Option<Vec<String>>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            filter: None,
            partition_by: None,
            null_ratio_warning: EvaluationSettings::default().null_ratio_warning,
            columns: None,
        }
    }
}

impl EvalOptions {
    pub fn from_settings(settings: &EvaluationSettings) -> Self {
        Self {
            null_ratio_warning: settings.null_ratio_warning,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_partition_by(mut self, column: impl Into<String>) -> Self {
        self.partition_by = Some(column.into());
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }
}

/// Result of evaluating an expression over a row set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    /// One value per input row, in row order.
    pub values: Vec<Value>,
    pub inferred_type: ValueType,
    pub warnings: Vec<String>,
    pub stats: EvalStats,
}

/// Parse and evaluate `expr` over `rows`.
pub fn evaluate_expression(expr: &str, rows: &[Row], options: &EvalOptions) -> Result<Evaluation> {
    let ast = parse(expr)?;
    evaluate_ast(&ast, rows, options)
}

/// Evaluate an already parsed expression over `rows`.
pub fn evaluate_ast(ast: &AstNode, rows: &[Row], options: &EvalOptions) -> Result<Evaluation> {
    let columns = available_columns(rows, options);
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    check_expression(ast, &columns)?;

    let filter = options.filter.as_deref().map(parse).transpose()?;
    if let Some(filter) = &filter {
        check_expression(filter, &columns)?;
        if let Some((name, _)) = filter
            .calls()
            .into_iter()
            .find(|(name, _)| functions::lookup(name).is_some_and(|f| f.is_column_wise()))
        {
            return Err(PrismError::Evaluation(format!(
                "Column-wise function '{}' cannot be used in a filter",
                name
            )));
        }
    }
    if let Some(partition) = &options.partition_by {
        check_column(partition, &columns)?;
    }

    let mask: Vec<bool> = match &filter {
        Some(filter) => {
            let plain = Evaluator::default();
            rows.iter()
                .enumerate()
                .map(|(i, row)| plain.eval(filter, row, i).is_truthy())
                .collect()
        }
        None => vec![true; rows.len()],
    };
    let partitions: Vec<String> = rows
        .iter()
        .map(|row| match &options.partition_by {
            Some(column) => row.get(column).map_or_else(|| Value::Null.group_key(), Value::group_key),
            None => String::new(),
        })
        .collect();

    let mut evaluator = Evaluator::default();
    evaluator.precompute(ast, rows, &mask, &partitions)?;

    let values: Vec<Value> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| {
            if mask[i] {
                evaluator.eval(ast, row, i)
            } else {
                Value::Null
            }
        })
        .collect();

    let inferred_type = infer_type(ast, &values);
    let stats = EvalStats::compute(&values, &mask, inferred_type);
    let warnings = collect_warnings(&stats, inferred_type, options.null_ratio_warning);
    debug!(
        rows = stats.total_rows,
        evaluated = stats.evaluated_rows,
        inferred_type = %inferred_type,
        warnings = warnings.len(),
        "Evaluated expression"
    );

    Ok(Evaluation {
        values,
        inferred_type,
        warnings,
        stats,
    })
}

fn available_columns(rows: &[Row], options: &EvalOptions) -> Vec<String> {
    match &options.columns {
        Some(columns) => columns.clone(),
        None => rows
            .iter()
            .flat_map(|row| row.keys().cloned())
            .collect::<BTreeSet<String>>()
            .into_iter()
            .collect(),
    }
}

fn check_column(name: &str, columns: &[&str]) -> Result<()> {
    if columns.contains(&name) {
        return Ok(());
    }
    let suggestion = suggest(name, columns.iter().copied(), DEFAULT_THRESHOLD);
    Err(PrismError::Evaluation(format!(
        "Unknown column '{}'.{} Available columns: {}",
        name,
        did_you_mean(suggestion.as_deref()),
        columns.join(", ")
    )))
}

/// Check column references and function calls without evaluating.
pub fn check_expression(ast: &AstNode, columns: &[&str]) -> Result<()> {
    for name in ast.column_refs() {
        check_column(&name, columns)?;
    }
    for (name, args) in ast.calls() {
        functions::resolve(name)?.check_arity(args.len())?;
    }
    Ok(())
}

/// Row evaluator holding precomputed column-wise results, keyed by the
/// address of their call node.
#[derive(Default)]
struct Evaluator {
    precomputed: HashMap<*const AstNode, Vec<Value>>,
}

impl Evaluator {
    fn precompute(
        &mut self,
        ast: &AstNode,
        rows: &[Row],
        mask: &[bool],
        partitions: &[String],
    ) -> Result<()> {
        let mut column_calls = Vec::new();
        ast.walk_post(&mut |node| {
            if let AstNode::Call { name, .. } = node {
                if functions::lookup(name).is_some_and(|f| f.is_column_wise()) {
                    column_calls.push(node);
                }
            }
        });

        for node in column_calls {
            let column = self.compute_column(node, rows, mask, partitions)?;
            self.precomputed.insert(node as *const AstNode, column);
        }
        Ok(())
    }

    fn compute_column(
        &self,
        node: &AstNode,
        rows: &[Row],
        mask: &[bool],
        partitions: &[String],
    ) -> Result<Vec<Value>> {
        let AstNode::Call { name, args } = node else {
            return Ok(vec![Value::Null; rows.len()]);
        };
        let name = functions::lookup(name).map_or(name.as_str(), |f| f.name);
        let participating: Vec<usize> = (0..rows.len()).filter(|i| mask[*i]).collect();

        let buckets = match (name, participating.first()) {
            ("ntile", Some(&first)) => {
                let count = args
                    .get(1)
                    .map(|arg| self.eval(arg, &rows[first], first))
                    .and_then(|v| v.to_number())
                    .filter(|n| *n >= 1.0 && n.fract() == 0.0);
                match count {
                    Some(n) => n as usize,
                    None => {
                        return Err(PrismError::Evaluation(
                            "Function 'ntile' requires a positive whole number of buckets"
                                .to_string(),
                        ))
                    }
                }
            }
            _ => 1,
        };

        let mut groups: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut group_order: Vec<&str> = Vec::new();
        for &i in &participating {
            let key = partitions[i].as_str();
            groups
                .entry(key)
                .or_insert_with(|| {
                    group_order.push(key);
                    Vec::new()
                })
                .push(i);
        }

        let mut out = vec![Value::Null; rows.len()];
        for key in group_order {
            let members = &groups[key];
            let inputs: Vec<Value> = members
                .iter()
                .map(|&i| match args.first() {
                    Some(arg) => self.eval(arg, &rows[i], i),
                    None => Value::Null,
                })
                .collect();
            for (&i, value) in members.iter().zip(call_column(name, &inputs, buckets)) {
                out[i] = value;
            }
        }
        Ok(out)
    }

    fn eval(&self, node: &AstNode, row: &Row, index: usize) -> Value {
        match node {
            AstNode::Number(n) => Value::number(*n),
            AstNode::String(s) => Value::Text(s.clone()),
            AstNode::Boolean(b) => Value::Bool(*b),
            AstNode::Null | AstNode::Array(_) => Value::Null,
            AstNode::ColumnRef(name) => row.get(name).cloned().unwrap_or_default(),
            AstNode::Unary { op, operand } => {
                let value = self.eval(operand, row, index);
                match op {
                    UnaryOp::Not if value.is_null() => Value::Null,
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::Neg => value.to_number().map_or(Value::Null, |n| Value::number(-n)),
                }
            }
            AstNode::Binary { op, left, right } => {
                let left_value = self.eval(left, row, index);
                match op {
                    BinaryOp::And if !left_value.is_truthy() => Value::Bool(false),
                    BinaryOp::Or if left_value.is_truthy() => Value::Bool(true),
                    BinaryOp::And | BinaryOp::Or => {
                        Value::Bool(self.eval(right, row, index).is_truthy())
                    }
                    _ => binary(*op, &left_value, &self.eval(right, row, index)),
                }
            }
            AstNode::Call { name, args } => {
                if let Some(column) = self.precomputed.get(&(node as *const AstNode)) {
                    return column.get(index).cloned().unwrap_or_default();
                }
                let Some(spec) = functions::lookup(name) else {
                    return Value::Null;
                };
                let args: Vec<Arg> = args
                    .iter()
                    .map(|arg| match arg {
                        AstNode::Array(items) => Arg::List(
                            items.iter().map(|item| self.eval(item, row, index)).collect(),
                        ),
                        other => Arg::Scalar(self.eval(other, row, index)),
                    })
                    .collect();
                call_row(spec.name, &args)
            }
        }
    }
}

/// Non-logical binary operators. Equality never yields null; everything
/// else propagates it.
fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Eq => return Value::Bool(safe_equal(left, right)),
        BinaryOp::Ne => return Value::Bool(!safe_equal(left, right)),
        _ => {}
    }
    if left.is_null() || right.is_null() {
        return Value::Null;
    }
    if op.is_comparison() {
        let Some(ordering) = compare(left, right) else {
            return Value::Null;
        };
        return Value::Bool(match op {
            BinaryOp::Lt => ordering.is_lt(),
            BinaryOp::Lte => ordering.is_le(),
            BinaryOp::Gt => ordering.is_gt(),
            _ => ordering.is_ge(),
        });
    }

    let (a, b) = match (left.to_number(), right.to_number()) {
        (Some(a), Some(b)) => (a, b),
        (None, None) if op == BinaryOp::Add => return Value::Text(format!("{}{}", left, right)),
        _ => return Value::Null,
    };
    match op {
        BinaryOp::Add => Value::number(a + b),
        BinaryOp::Sub => Value::number(a - b),
        BinaryOp::Mul => Value::number(a * b),
        BinaryOp::Div if b == 0.0 => Value::Null,
        BinaryOp::Div => Value::number(a / b),
        BinaryOp::Mod if b == 0.0 => Value::Null,
        BinaryOp::Mod => Value::number(a % b),
        BinaryOp::Pow => Value::number(a.powf(b)),
        _ => Value::Null,
    }
}
