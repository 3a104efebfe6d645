//! Integration tests for the transform pipeline.
//!
//! Covers batch atomicity on transactional and non-transactional storage,
//! cycle rejection, layer shadowing and a SQLite-backed pipeline.

use prism::config::Settings;
use prism::expression::ValueType;
use prism::storage::{MemoryStore, SqliteStore, Storage};
use prism::transform::{Layer, TransformPipeline, TransformSpec};
use prism::value::{Row, Value};
use prism::PrismError;

fn grade_rows() -> Vec<Row> {
    [("A", 80), ("A", 90), ("B", 70)]
        .iter()
        .map(|(class, score)| {
            Row::from([
                ("class".to_string(), Value::from(*class)),
                ("score".to_string(), Value::from(*score)),
            ])
        })
        .collect()
}

fn memory(store: MemoryStore) -> TransformPipeline<MemoryStore> {
    TransformPipeline::new(store.with_table(
        "grades",
        vec!["class".into(), "score".into()],
        grade_rows(),
    ))
}

fn column<S: Storage>(pipeline: &TransformPipeline<S>, name: &str) -> Vec<Value> {
    pipeline
        .storage()
        .rows("grades")
        .unwrap()
        .into_iter()
        .map(|mut row| row.remove(name).unwrap_or_default())
        .collect()
}

fn nums(values: &[i64]) -> Vec<Value> {
    values.iter().map(|v| Value::from(*v)).collect()
}

// ============================================================================
// Single and batch transforms
// ============================================================================

#[test]
fn test_chained_transforms() {
    let mut pipeline = memory(MemoryStore::new());
    let first = pipeline
        .execute_single_transform("grades", TransformSpec::new("doubled", "score * 2"))
        .unwrap();
    assert_eq!(first.values, nums(&[160, 180, 140]));
    assert_eq!(first.layer, Layer::Working);

    let outcomes = pipeline
        .execute_batch_transform(
            "grades",
            vec![
                TransformSpec::new("quadrupled", "doubled * 2"),
                TransformSpec::new("centered", "quadrupled - col_mean(quadrupled)")
                    .with_partition_by("class"),
            ],
        )
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(column(&pipeline, "quadrupled"), nums(&[320, 360, 280]));
    assert_eq!(column(&pipeline, "centered"), nums(&[-20, 20, 0]));
    assert_eq!(
        pipeline.source_columns("grades").unwrap(),
        vec!["class".to_string(), "score".to_string()]
    );
}

#[test]
fn test_filtered_transform_leaves_nulls() {
    let mut pipeline = memory(MemoryStore::new());
    let outcome = pipeline
        .execute_single_transform(
            "grades",
            TransformSpec::new("a_bonus", "score + 5").with_filter("class == 'A'"),
        )
        .unwrap();
    assert_eq!(outcome.values, vec![Value::from(85), Value::from(95), Value::Null]);
    assert_eq!(outcome.stats.evaluated_rows, 2);
    assert_eq!(
        pipeline.get("grades", "a_bonus").unwrap().filter.as_deref(),
        Some("class == 'A'")
    );
}

#[test]
fn test_cycle_rejected_and_values_kept() {
    let mut pipeline = memory(MemoryStore::new());
    pipeline
        .execute_batch_transform(
            "grades",
            vec![TransformSpec::new("a", "score * 2"), TransformSpec::new("b", "a + 1")],
        )
        .unwrap();

    let err = pipeline
        .execute_single_transform("grades", TransformSpec::new("a", "b * 2"))
        .unwrap_err();
    assert_eq!(err.cycle_path().unwrap(), ["a", "b", "a"]);
    assert_eq!(err.to_string(), "Circular dependency: a -> b -> a");

    assert_eq!(column(&pipeline, "a"), nums(&[160, 180, 140]));
    assert_eq!(pipeline.get("grades", "a").unwrap().expr, "score * 2");
}

#[test]
fn test_self_reference_is_a_cycle() {
    let mut pipeline = memory(MemoryStore::new());
    pipeline
        .execute_single_transform("grades", TransformSpec::new("total", "score"))
        .unwrap();
    let err = pipeline
        .execute_single_transform("grades", TransformSpec::new("total", "total + 1"))
        .unwrap_err();
    assert_eq!(err.cycle_path().unwrap(), ["total", "total"]);
}

fn assert_batch_rolls_back(store: MemoryStore) {
    let mut pipeline = memory(store);
    pipeline
        .execute_single_transform("grades", TransformSpec::new("kept", "score + 1"))
        .unwrap();

    let err = pipeline
        .execute_batch_transform(
            "grades",
            vec![
                TransformSpec::new("good", "score * 10"),
                TransformSpec::new("kept", "score + 100"),
                TransformSpec::new("bad", "missing_column * 2"),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, PrismError::Evaluation(_)));

    let storage = pipeline.storage();
    assert!(!storage.has_column("grades", "good").unwrap());
    assert!(!storage.has_column("grades", "bad").unwrap());
    assert_eq!(column(&pipeline, "kept"), nums(&[81, 91, 71]));
    assert!(pipeline.get("grades", "good").is_none());
    assert!(pipeline.get("grades", "bad").is_none());
    assert_eq!(pipeline.get("grades", "kept").unwrap().expr, "score + 1");
}

#[test]
fn test_batch_rollback_with_transactions() {
    assert_batch_rolls_back(MemoryStore::new());
}

#[test]
fn test_batch_rollback_by_manual_undo() {
    let store = MemoryStore::non_transactional();
    assert!(!store.supports_transactions());
    assert_batch_rolls_back(store);
}

#[test]
fn test_invalid_name_fails_before_writing() {
    let mut pipeline = memory(MemoryStore::new());
    let err = pipeline
        .execute_single_transform("grades", TransformSpec::new("final score", "score"))
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Column name 'final score' cannot contain spaces; use underscores instead"
    );
    assert_eq!(
        pipeline.storage().columns("grades").unwrap(),
        vec!["class".to_string(), "score".to_string()]
    );
}

// ============================================================================
// Layers
// ============================================================================

#[test]
fn test_working_shadows_derived() {
    let mut pipeline = memory(MemoryStore::new());
    let derived = pipeline
        .execute_single_transform("grades", TransformSpec::new("bonus", "score + 5").derived())
        .unwrap();
    assert!(!derived.shadowed);

    let working = pipeline
        .execute_single_transform("grades", TransformSpec::new("bonus", "score + 10"))
        .unwrap();
    assert!(working.shadowed);
    assert!(!working.overwritten);
    assert_eq!(column(&pipeline, "bonus"), nums(&[90, 100, 80]));
    assert_eq!(pipeline.get("grades", "bonus").unwrap().layer, Layer::Working);
    assert_eq!(
        pipeline.get_derived("grades", "bonus").unwrap().expr,
        "score + 5"
    );

    // A new derived definition under the override is recorded, not written.
    let hidden = pipeline
        .execute_single_transform("grades", TransformSpec::new("bonus", "score + 7").derived())
        .unwrap();
    assert!(hidden.shadowed);
    assert!(hidden.overwritten);
    assert_eq!(column(&pipeline, "bonus"), nums(&[90, 100, 80]));

    let removed = pipeline.drop("grades", "bonus", Some(Layer::Working)).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(column(&pipeline, "bonus"), nums(&[87, 97, 77]));
    assert_eq!(pipeline.get("grades", "bonus").unwrap().layer, Layer::Derived);
}

#[test]
fn test_promote_then_manifest() {
    let mut pipeline = memory(MemoryStore::new());
    pipeline
        .execute_batch_transform(
            "grades",
            vec![
                TransformSpec::new("pct", "score / 100"),
                TransformSpec::new("passed", "pct >= 0.75").with_type(ValueType::Boolean),
            ],
        )
        .unwrap();
    assert!(pipeline.manifest().unwrap().tables.is_empty());

    pipeline.promote("grades", "pct").unwrap();
    pipeline.promote("grades", "passed").unwrap();

    let manifest = pipeline.manifest().unwrap();
    let columns: Vec<&str> = manifest
        .entries("grades")
        .iter()
        .map(|e| e.column.as_str())
        .collect();
    assert_eq!(columns, vec!["pct", "passed"]);
    assert_eq!(manifest.entries("grades")[1].value_type, ValueType::Boolean);
    assert_eq!(column(&pipeline, "passed"), vec![Value::from(true), true.into(), false.into()]);
}

#[test]
fn test_drop_everything() {
    let mut pipeline = memory(MemoryStore::new());
    pipeline
        .execute_single_transform("grades", TransformSpec::new("tmp", "score").derived())
        .unwrap();
    pipeline
        .execute_single_transform("grades", TransformSpec::new("tmp", "score + 1"))
        .unwrap();

    let removed = pipeline.drop("grades", "tmp", None).unwrap();
    assert_eq!(removed.len(), 2);
    assert!(!pipeline.storage().has_column("grades", "tmp").unwrap());
    assert!(pipeline.defined_columns("grades").is_empty());

    let err = pipeline.drop("grades", "tmp", Some(Layer::Derived)).unwrap_err();
    assert_eq!(err.to_string(), "No derived column 'tmp' in table 'grades'");
}

// ============================================================================
// SQLite storage
// ============================================================================

fn sqlite_pipeline() -> TransformPipeline<SqliteStore> {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .create_table("grades", &["class".into(), "score".into()], &grade_rows())
        .unwrap();
    TransformPipeline::with_settings(store, &Settings::default())
}

#[test]
fn test_sqlite_pipeline_materializes_columns() {
    let mut pipeline = sqlite_pipeline();
    pipeline
        .execute_batch_transform(
            "grades",
            vec![
                TransformSpec::new("doubled", "score * 2").derived(),
                TransformSpec::new("label", "if_else(doubled > 150, 'high', 'low')").derived(),
            ],
        )
        .unwrap();
    assert_eq!(column(&pipeline, "doubled"), nums(&[160, 180, 140]));
    assert_eq!(
        column(&pipeline, "label"),
        vec![Value::from("high"), "high".into(), "low".into()]
    );

    let result = pipeline
        .storage()
        .query("SELECT \"label\", COUNT(*) AS \"n\" FROM \"grades\" GROUP BY \"label\" ORDER BY \"label\"")
        .unwrap();
    assert_eq!(result.column_values("n"), nums(&[2, 1]));
}

#[test]
fn test_sqlite_batch_rolls_back() {
    let mut pipeline = sqlite_pipeline();
    let err = pipeline
        .execute_batch_transform(
            "grades",
            vec![
                TransformSpec::new("good", "score + 1"),
                TransformSpec::new("bad", "score +"),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, PrismError::Syntax(_)));
    assert!(!pipeline.storage().has_column("grades", "good").unwrap());
    assert!(pipeline.list("grades", None).is_empty());
}
