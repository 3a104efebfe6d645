//! Integration tests for the expression language.
//!
//! Every test runs over the same small gradebook: two classes, one student
//! without a score or submission date.

use prism::config::EvaluationSettings;
use prism::expression::{evaluate_expression, EvalOptions, Evaluation, ValueType};
use prism::value::{Row, Value};
use prism::PrismError;

fn gradebook() -> Vec<Row> {
    let students = [
        ("ana", "A", Some(80), Some("2024-03-01"), "2024-03-05"),
        ("ben", "A", Some(90), Some("2024-03-07"), "2024-03-05"),
        ("cal", "B", Some(70), Some("2024-03-04"), "2024-03-05"),
        ("dee", "B", None, None, "2024-03-05"),
        ("eve", "B", Some(60), Some("2024-03-05"), "2024-03-05"),
    ];
    students
        .iter()
        .map(|(name, class, score, submitted, due)| {
            Row::from([
                ("name".to_string(), Value::from(*name)),
                ("class".to_string(), Value::from(*class)),
                ("score".to_string(), Value::from(*score)),
                ("submitted".to_string(), Value::from(*submitted)),
                ("due".to_string(), Value::from(*due)),
            ])
        })
        .collect()
}

fn eval_with(expr: &str, options: &EvalOptions) -> Evaluation {
    evaluate_expression(expr, &gradebook(), options).unwrap()
}

fn eval(expr: &str) -> Vec<Value> {
    eval_with(expr, &EvalOptions::default()).values
}

fn nums(values: &[Option<f64>]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

fn bools(values: &[Option<bool>]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

fn texts(values: &[&str]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

fn assert_close(values: &[Value], expected: &[Option<f64>]) {
    assert_eq!(values.len(), expected.len());
    for (value, expected) in values.iter().zip(expected) {
        match (value.to_number(), expected) {
            (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9, "{} vs {}", a, b),
            (None, None) => {}
            _ => panic!("{:?} vs {:?}", value, expected),
        }
    }
}

// ============================================================================
// Operators
// ============================================================================

#[test]
fn test_precedence() {
    assert_eq!(
        eval("score + 10 * 2 ^ 2"),
        nums(&[Some(120.0), Some(130.0), Some(110.0), None, Some(100.0)])
    );
    assert_eq!(eval("-2 ^ 2")[0], Value::from(4));
    assert_eq!(eval("2 ^ 3 ^ 2")[0], Value::from(512));
    assert_eq!(eval("(score + 10) % 30")[0], Value::from(0));
}

#[test]
fn test_equality_never_yields_null() {
    assert_eq!(
        eval("score == null"),
        bools(&[Some(false), Some(false), Some(false), Some(true), Some(false)])
    );
    assert_eq!(
        eval("score != 80"),
        bools(&[Some(false), Some(true), Some(true), Some(true), Some(true)])
    );
    assert_eq!(eval("score == '80'")[0], Value::from(true));
}

#[test]
fn test_null_propagates_through_arithmetic_and_comparison() {
    assert_eq!(eval("score * 2")[3], Value::Null);
    assert_eq!(eval("score > 75")[3], Value::Null);
    assert_eq!(eval("!(score > 75)")[3], Value::Null);
    assert_eq!(eval("fill_null(score, 0) + 1")[3], Value::from(1));
    assert_eq!(eval("score / 0")[0], Value::Null);
}

#[test]
fn test_logic_short_circuits_on_null() {
    assert_eq!(
        eval("score > 75 && class == 'A'"),
        bools(&[Some(true), Some(true), Some(false), Some(false), Some(false)])
    );
    assert_eq!(
        eval("is_null(score) || score < 65"),
        bools(&[Some(false), Some(false), Some(false), Some(true), Some(true)])
    );
}

// ============================================================================
// Syntax and reference errors
// ============================================================================

#[test]
fn test_syntax_error_points_at_token() {
    let err = evaluate_expression("score * * 2", &gradebook(), &EvalOptions::default()).unwrap_err();
    let PrismError::Syntax(syntax) = &err else {
        panic!("expected a syntax error, got {:?}", err);
    };
    assert_eq!(syntax.position, 8);
    let rendered = err.to_string();
    assert!(rendered.starts_with("Unexpected '*' at position 8"), "{}", rendered);
    assert!(rendered.ends_with(&format!("  {}^", " ".repeat(8))), "{}", rendered);
}

#[test]
fn test_single_equals_hint() {
    let err = evaluate_expression("class = 'A'", &gradebook(), &EvalOptions::default())
        .unwrap_err()
        .to_string();
    assert!(err.contains("Did you mean '=='?"), "{}", err);
}

#[test]
fn test_unknown_column_and_function() {
    let err = evaluate_expression("scroe * 2", &gradebook(), &EvalOptions::default()).unwrap_err();
    assert!(matches!(err, PrismError::Evaluation(_)));
    assert!(err.to_string().contains("Did you mean 'score'?"), "{}", err);

    let err = evaluate_expression("`final score` + 1", &gradebook(), &EvalOptions::default())
        .unwrap_err()
        .to_string();
    assert!(err.starts_with("Unknown column 'final score'"), "{}", err);

    let err = evaluate_expression("zscor(score)", &gradebook(), &EvalOptions::default())
        .unwrap_err()
        .to_string();
    assert_eq!(err, "Unknown function 'zscor'. Did you mean 'zscore'?");
}

// ============================================================================
// Column-wise functions, partitions and filters
// ============================================================================

#[test]
fn test_center_per_partition() {
    let options = EvalOptions::default().with_partition_by("class");
    let result = eval_with("score - col_mean(score)", &options);
    assert_eq!(
        result.values,
        nums(&[Some(-5.0), Some(5.0), Some(5.0), None, Some(-5.0)])
    );

    let unpartitioned = eval("col_mean(score)");
    assert_eq!(unpartitioned[3], Value::from(75));
}

#[test]
fn test_zscore_per_partition() {
    let options = EvalOptions::default().with_partition_by("class");
    let z = 0.5f64.sqrt();
    assert_close(
        &eval_with("zscore(score)", &options).values,
        &[Some(-z), Some(z), Some(z), None, Some(-z)],
    );
}

#[test]
fn test_filter_limits_participating_rows() {
    let options = EvalOptions::default().with_filter("class == 'B'");
    let result = eval_with("rank(score)", &options);
    assert_eq!(
        result.values,
        nums(&[None, None, Some(2.0), None, Some(1.0)])
    );
    assert_eq!(result.stats.total_rows, 5);
    assert_eq!(result.stats.evaluated_rows, 3);
    assert_eq!(result.stats.null_count, 1);
}

#[test]
fn test_column_wise_in_filter_rejected() {
    let options = EvalOptions::default().with_filter("score > col_mean(score)");
    let err = evaluate_expression("score", &gradebook(), &options)
        .unwrap_err()
        .to_string();
    assert!(err.contains("cannot be used in a filter"), "{}", err);
}

#[test]
fn test_unknown_partition_column() {
    let options = EvalOptions::default().with_partition_by("klass");
    let err = evaluate_expression("zscore(score)", &gradebook(), &options)
        .unwrap_err()
        .to_string();
    assert!(err.contains("Did you mean 'class'?"), "{}", err);
}

// ============================================================================
// Dates, recoding and types
// ============================================================================

#[test]
fn test_lateness() {
    let result = eval_with("date_diff(submitted, due)", &EvalOptions::default());
    assert_eq!(result.inferred_type, ValueType::Numeric);
    assert_eq!(
        result.values,
        nums(&[Some(-4.0), Some(2.0), Some(-1.0), None, Some(0.0)])
    );

    let status = eval(
        "case(is_null(submitted), 'missing', date_diff(submitted, due) > 0, 'late', 'on time')",
    );
    assert_eq!(
        status,
        texts(&["on time", "late", "on time", "missing", "on time"])
    );
}

#[test]
fn test_grade_bands() {
    let result = eval_with(
        "cut(score, [0, 65, 85, 100], ['C', 'B', 'A'])",
        &EvalOptions::default(),
    );
    assert_eq!(result.inferred_type, ValueType::Categorical);
    assert_eq!(result.values[0], Value::from("B"));
    assert_eq!(result.values[1], Value::from("A"));
    assert_eq!(result.values[3], Value::Null);
    assert_eq!(result.values[4], Value::from("C"));
}

#[test]
fn test_inferred_types() {
    let cases = [
        ("score * 1.5", ValueType::Numeric),
        ("submitted > due", ValueType::Boolean),
        ("date_floor(due, 'month')", ValueType::Date),
        ("upper(name)", ValueType::Categorical),
        ("name", ValueType::Categorical),
        ("due", ValueType::Date),
        ("if_else(score > 75, 'high', 'low')", ValueType::Categorical),
    ];
    for (expr, expected) in cases {
        assert_eq!(
            eval_with(expr, &EvalOptions::default()).inferred_type,
            expected,
            "{}",
            expr
        );
    }
}

// ============================================================================
// Warnings and stats
// ============================================================================

#[test]
fn test_null_ratio_warning_follows_settings() {
    let expr = "if_else(score >= 75, score, null)";
    let result = eval_with(expr, &EvalOptions::default());
    assert_eq!(result.warnings, vec!["60% of values are null (3 of 5)"]);

    let lenient = EvalOptions::from_settings(&EvaluationSettings {
        null_ratio_warning: 0.75,
    });
    assert!(eval_with(expr, &lenient).warnings.is_empty());
}

#[test]
fn test_zero_variance_warning() {
    let result = eval_with("score * 0", &EvalOptions::default());
    assert_eq!(
        result.warnings,
        vec!["All values are identical (0): zero variance"]
    );
    assert_eq!(result.stats.min, Some(0.0));
    assert_eq!(result.stats.max, Some(0.0));
}

#[test]
fn test_evaluation_serializes_camel_case() {
    let result = eval_with("score", &EvalOptions::default());
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["inferredType"], "numeric");
    assert_eq!(json["stats"]["totalRows"], 5);
    assert_eq!(json["stats"]["nullCount"], 1);
    assert_eq!(json["stats"]["mean"], 75.0);
    assert_eq!(json["values"][3], serde_json::Value::Null);
}
