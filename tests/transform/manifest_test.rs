//! Integration tests for manifest persistence and replay.
//!
//! A session defines derived columns, saves the manifest, and a fresh
//! pipeline over the same source rows rebuilds them from the file.

use std::path::PathBuf;

use prism::expression::ValueType;
use prism::storage::{MemoryStore, Storage};
use prism::transform::{replay, Layer, Manifest, ManifestEntry, TransformPipeline, TransformSpec};
use prism::value::{Row, Value};
use prism::PrismError;

fn fresh_pipeline() -> TransformPipeline<MemoryStore> {
    let rows: Vec<Row> = [("A", 80), ("A", 90), ("B", 70), ("B", 50)]
        .iter()
        .map(|(class, score)| {
            Row::from([
                ("class".to_string(), Value::from(*class)),
                ("score".to_string(), Value::from(*score)),
            ])
        })
        .collect();
    TransformPipeline::new(MemoryStore::new().with_table(
        "grades",
        vec!["class".into(), "score".into()],
        rows,
    ))
}

fn column(pipeline: &TransformPipeline<MemoryStore>, name: &str) -> Vec<Value> {
    pipeline
        .storage()
        .rows("grades")
        .unwrap()
        .into_iter()
        .map(|mut row| row.remove(name).unwrap_or_default())
        .collect()
}

/// A per-test file under the system temp dir, removed on drop.
struct TempFile(PathBuf);

impl TempFile {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("prism-{}-{}.json", name, std::process::id()));
        TempFile(path)
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

fn session() -> TransformPipeline<MemoryStore> {
    let mut pipeline = fresh_pipeline();
    pipeline
        .execute_batch_transform(
            "grades",
            vec![
                TransformSpec::new("pct", "score / 100").derived(),
                TransformSpec::new("z", "zscore(pct)")
                    .derived()
                    .with_partition_by("class"),
                TransformSpec::new("honors", "pct >= 0.85")
                    .derived()
                    .with_filter("class == 'A'"),
                TransformSpec::new("scratch", "score - 1"),
            ],
        )
        .unwrap();
    pipeline
}

// ============================================================================
// Save and load
// ============================================================================

#[test]
fn test_manifest_lists_derived_in_dependency_order() {
    let manifest = session().manifest().unwrap();
    let entries = manifest.entries("grades");
    let columns: Vec<&str> = entries.iter().map(|e| e.column.as_str()).collect();
    assert_eq!(columns, vec!["pct", "honors", "z"]);
    assert_eq!(entries[2].partition_by.as_deref(), Some("class"));
    assert_eq!(entries[1].filter.as_deref(), Some("class == 'A'"));
    assert_eq!(entries[1].value_type, ValueType::Boolean);
    assert!(manifest.entries("other").is_empty());
}

#[test]
fn test_save_and_load_roundtrip() {
    let file = TempFile::new("roundtrip");
    let manifest = session().manifest().unwrap();
    manifest.save(&file.0).unwrap();

    let loaded = Manifest::load(&file.0).unwrap();
    assert_eq!(loaded, manifest);

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&file.0).unwrap()).unwrap();
    assert_eq!(raw["version"], 1);
    assert_eq!(raw["tables"]["grades"][2]["partitionBy"], "class");
    assert!(raw["tables"]["grades"][0].get("filter").is_none());
}

#[test]
fn test_load_missing_file() {
    let file = TempFile::new("missing");
    let err = Manifest::load(&file.0).unwrap_err();
    assert!(matches!(err, PrismError::Execution(_)));
}

// ============================================================================
// Replay
// ============================================================================

#[test]
fn test_replay_rebuilds_columns() {
    let original = session();
    let manifest = original.manifest().unwrap();

    let mut rebuilt = fresh_pipeline();
    let outcomes = replay(&mut rebuilt, &manifest, "grades").unwrap();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.layer == Layer::Derived));

    for name in ["pct", "z", "honors"] {
        assert_eq!(column(&rebuilt, name), column(&original, name), "{}", name);
    }
    assert!(!rebuilt.storage().has_column("grades", "scratch").unwrap());
    assert_eq!(rebuilt.manifest().unwrap(), manifest);
    assert_eq!(
        column(&rebuilt, "honors"),
        vec![Value::from(false), true.into(), Value::Null, Value::Null]
    );
}

#[test]
fn test_replay_of_unknown_table_is_noop() {
    let manifest = session().manifest().unwrap();
    let mut pipeline = fresh_pipeline();
    assert!(replay(&mut pipeline, &manifest, "nothing").unwrap().is_empty());
}

#[test]
fn test_failed_replay_is_all_or_nothing() {
    let mut manifest = Manifest::new();
    manifest.tables.insert(
        "grades".to_string(),
        vec![
            ManifestEntry {
                column: "pct".to_string(),
                expr: "score / 100".to_string(),
                value_type: ValueType::Numeric,
                partition_by: None,
                filter: None,
            },
            ManifestEntry {
                column: "curved".to_string(),
                expr: "pct + bonus".to_string(),
                value_type: ValueType::Numeric,
                partition_by: None,
                filter: None,
            },
        ],
    );

    let mut pipeline = fresh_pipeline();
    let err = replay(&mut pipeline, &manifest, "grades").unwrap_err();
    assert!(err.to_string().contains("Unknown column 'bonus'"), "{}", err);
    assert!(!pipeline.storage().has_column("grades", "pct").unwrap());
    assert!(pipeline.list("grades", None).is_empty());
}

#[test]
fn test_replay_rejects_source_collision() {
    let manifest = Manifest::from_json(
        r#"{"version": 1, "tables": {"grades": [{"column": "score", "expr": "1", "type": "numeric"}]}}"#,
    )
    .unwrap();
    let mut pipeline = fresh_pipeline();
    let err = replay(&mut pipeline, &manifest, "grades").unwrap_err();
    assert!(matches!(err, PrismError::Name(_)));
}
