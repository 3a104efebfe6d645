//! Output type inference, evaluation warnings and summary statistics.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::ast::{AstNode, UnaryOp};
use super::functions;
use crate::stats::mean;
use crate::value::{format_number, looks_like_date, Value};

/// Type of a derived column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Numeric,
    Categorical,
    Date,
    Boolean,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Numeric => "numeric",
            ValueType::Categorical => "categorical",
            ValueType::Date => "date",
            ValueType::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// Type implied by the shape of the tree, if any.
///
/// Comparisons and logic are boolean, arithmetic is numeric (`+` becomes
/// categorical when a side is known to be text), catalogue functions have
/// fixed result types and `if_else`/`case` take the type of their first
/// value branch. Column references, `null` and value-dependent functions
/// give no answer.
pub fn infer_from_ast(ast: &AstNode) -> Option<ValueType> {
    ast.fold(&mut |node, children: Vec<Option<ValueType>>| match node {
        AstNode::Number(_) => Some(ValueType::Numeric),
        AstNode::String(_) => Some(ValueType::Categorical),
        AstNode::Boolean(_) => Some(ValueType::Boolean),
        AstNode::Null | AstNode::ColumnRef(_) | AstNode::Array(_) => None,
        AstNode::Unary { op, .. } => Some(match op {
            UnaryOp::Neg => ValueType::Numeric,
            UnaryOp::Not => ValueType::Boolean,
        }),
        AstNode::Binary { op, .. } => {
            if op.is_comparison() || op.is_logical() {
                Some(ValueType::Boolean)
            } else if *op == super::ast::BinaryOp::Add
                && children.contains(&Some(ValueType::Categorical))
            {
                Some(ValueType::Categorical)
            } else {
                Some(ValueType::Numeric)
            }
        }
        AstNode::Call { name, .. } => match name.as_str() {
            "if_else" | "case" => children.get(1).copied().flatten(),
            _ => functions::lookup(name).and_then(|spec| spec.returns),
        },
    })
}

/// Type implied by produced values. Nulls are ignored; no values at all
/// reads as numeric.
pub fn infer_from_values(values: &[Value]) -> ValueType {
    let present: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    if present.is_empty() {
        return ValueType::Numeric;
    }
    if present.iter().all(|v| matches!(v, Value::Bool(_))) {
        ValueType::Boolean
    } else if present
        .iter()
        .all(|v| matches!(v, Value::Number(_)) || v.to_number().is_some())
    {
        ValueType::Numeric
    } else if present
        .iter()
        .all(|v| matches!(v, Value::Text(s) if looks_like_date(s)))
    {
        ValueType::Date
    } else {
        ValueType::Categorical
    }
}

pub fn infer_type(ast: &AstNode, values: &[Value]) -> ValueType {
    infer_from_ast(ast).unwrap_or_else(|| infer_from_values(values))
}

/// Summary of an evaluation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvalStats {
    pub total_rows: usize,
    /// Rows that passed the filter.
    pub evaluated_rows: usize,
    /// Nulls among evaluated rows.
    pub null_count: usize,
    pub distinct_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
}

impl EvalStats {
    /// `mask[i]` tells whether row `i` was evaluated.
    pub fn compute(values: &[Value], mask: &[bool], value_type: ValueType) -> Self {
        let evaluated: Vec<&Value> = values
            .iter()
            .zip(mask)
            .filter(|(_, keep)| **keep)
            .map(|(v, _)| v)
            .collect();
        let distinct: HashSet<String> = evaluated
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| v.group_key())
            .collect();

        let mut stats = EvalStats {
            total_rows: values.len(),
            evaluated_rows: evaluated.len(),
            null_count: evaluated.iter().filter(|v| v.is_null()).count(),
            distinct_count: distinct.len(),
            ..Default::default()
        };
        if value_type == ValueType::Numeric {
            let numbers: Vec<f64> = evaluated.iter().filter_map(|v| v.to_number()).collect();
            stats.min = numbers.iter().copied().reduce(f64::min);
            stats.max = numbers.iter().copied().reduce(f64::max);
            stats.mean = mean(&numbers);
        }
        stats
    }
}

/// Data-quality warnings for an evaluation result.
pub fn collect_warnings(stats: &EvalStats, value_type: ValueType, null_ratio: f64) -> Vec<String> {
    let mut warnings = Vec::new();
    if stats.evaluated_rows == 0 {
        return warnings;
    }
    if stats.null_count == stats.evaluated_rows {
        warnings.push("All values are null".to_string());
        return warnings;
    }
    let ratio = stats.null_count as f64 / stats.evaluated_rows as f64;
    if ratio > null_ratio {
        warnings.push(format!(
            "{}% of values are null ({} of {})",
            format_number((ratio * 100.0).round()),
            stats.null_count,
            stats.evaluated_rows
        ));
    }
    let non_null = stats.evaluated_rows - stats.null_count;
    if value_type == ValueType::Numeric && non_null > 1 && stats.min == stats.max {
        if let Some(value) = stats.min {
            warnings.push(format!(
                "All values are identical ({}): zero variance",
                format_number(value)
            ));
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::parse;

    fn ast_type(source: &str) -> Option<ValueType> {
        infer_from_ast(&parse(source).unwrap())
    }

    #[test]
    fn test_infer_from_shape() {
        assert_eq!(ast_type("score * 2 + bonus"), Some(ValueType::Numeric));
        assert_eq!(ast_type("-score"), Some(ValueType::Numeric));
        assert_eq!(ast_type("score > 2 && flag"), Some(ValueType::Boolean));
        assert_eq!(ast_type("first + ' ' + last"), Some(ValueType::Categorical));
        assert_eq!(ast_type("upper(name)"), Some(ValueType::Categorical));
        assert_eq!(ast_type("date_floor(created, 'month')"), Some(ValueType::Date));
        assert_eq!(ast_type("if_else(x > 1, 'hi', 'lo')"), Some(ValueType::Categorical));
        assert_eq!(ast_type("case(x > 1, 1, 0)"), Some(ValueType::Numeric));
        assert_eq!(ast_type("coalesce(a, b)"), None);
        assert_eq!(ast_type("score"), None);
    }

    #[test]
    fn test_infer_from_values() {
        assert_eq!(
            infer_from_values(&[Value::Null, Value::Bool(true)]),
            ValueType::Boolean
        );
        assert_eq!(
            infer_from_values(&[Value::from(1), Value::from("2.5")]),
            ValueType::Numeric
        );
        assert_eq!(
            infer_from_values(&[Value::from("2024-01-01"), Value::from("2024-02-01")]),
            ValueType::Date
        );
        assert_eq!(
            infer_from_values(&[Value::from("a"), Value::from(1)]),
            ValueType::Categorical
        );
    }

    #[test]
    fn test_warnings() {
        let values = vec![Value::from(5), Value::from(5), Value::Null, Value::Null];
        let stats = EvalStats::compute(&values, &[true; 4], ValueType::Numeric);
        assert_eq!(stats.null_count, 2);
        assert_eq!(stats.distinct_count, 1);
        let warnings = collect_warnings(&stats, ValueType::Numeric, 0.2);
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].starts_with("50% of values are null"));
        assert!(warnings[1].contains("zero variance"));

        let all_null = EvalStats::compute(&[Value::Null], &[true], ValueType::Numeric);
        assert_eq!(
            collect_warnings(&all_null, ValueType::Numeric, 0.2),
            vec!["All values are null".to_string()]
        );
    }

    #[test]
    fn test_stats_ignore_filtered_rows() {
        let values = vec![Value::from(1), Value::Null, Value::from(3)];
        let stats = EvalStats::compute(&values, &[true, false, true], ValueType::Numeric);
        assert_eq!(stats.total_rows, 3);
        assert_eq!(stats.evaluated_rows, 2);
        assert_eq!(stats.null_count, 0);
        assert_eq!(stats.min, Some(1.0));
        assert_eq!(stats.max, Some(3.0));
        assert_eq!(stats.mean, Some(2.0));
        assert!(collect_warnings(&stats, ValueType::Numeric, 0.2).is_empty());
    }
}
