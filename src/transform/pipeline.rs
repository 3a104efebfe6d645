//! Transform pipeline: define, materialize and roll back derived columns.
//!
//! Each transform runs as a strict sequence:
//!
//! 1. validate the column name and reject collisions with source columns
//! 2. parse the expression (and filter)
//! 3. check the table's records for a cycle as if the new record existed
//! 4. evaluate over the currently materialized columns
//! 5. write the values into storage
//! 6. upsert the [`TransformRecord`]
//!
//! A batch runs every item inside one storage transaction. When any item
//! fails, the transaction is rolled back (or, for storage without
//! transactions, added columns are dropped and overwritten columns restored)
//! and the table's records are restored, so nothing from the batch survives.

use std::collections::{BTreeSet, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::dependency::{
    build_dependency_map, find_dependents, has_circular_dependency, record_dependencies,
    topological_sort,
};
use super::manifest::{Manifest, ManifestEntry};
use super::registry::{Layer, Registry, TableRegistry, TransformRecord};
use crate::config::{EvaluationSettings, Settings};
use crate::error::{PrismError, Result};
use crate::expression::{evaluate_ast, parse, EvalOptions, EvalStats, ValueType};
use crate::storage::Storage;
use crate::value::Value;

static COLUMN_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid column name pattern"));

/// Check that `name` can be used as a derived column name.
pub fn validate_column_name(name: &str) -> Result<()> {
    if COLUMN_NAME.is_match(name) {
        return Ok(());
    }
    let message = if name.is_empty() {
        "Column name cannot be empty".to_string()
    } else if name.chars().any(char::is_whitespace) {
        format!(
            "Column name '{}' cannot contain spaces; use underscores instead",
            name
        )
    } else if name.contains('.') {
        format!("Column name '{}' cannot contain dots", name)
    } else if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("Column name '{}' cannot start with a digit", name)
    } else {
        format!(
            "Column name '{}' may only contain letters, digits and underscores",
            name
        )
    };
    Err(PrismError::Name(message))
}

/// A requested transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    #[serde(alias = "create")]
    pub column: String,
    pub expr: String,
    #[serde(default = "default_layer")]
    pub layer: Layer,
    /// Explicit type; inferred from the expression when absent.
    #[serde(default, rename = "type")]
    pub value_type: Option<ValueType>,
    #[serde(default)]
    pub partition_by: Option<String>,
    #[serde(default)]
    pub filter: Option<String>,
    /// Explicit sequence number; the table's next one when absent.
    #[serde(default)]
    pub order: Option<u64>,
}

fn default_layer() -> Layer {
    Layer::Working
}

impl TransformSpec {
    /// A working-layer transform.
    pub fn new(column: impl Into<String>, expr: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            expr: expr.into(),
            layer: Layer::Working,
            value_type: None,
            partition_by: None,
            filter: None,
            order: None,
        }
    }

    pub fn derived(mut self) -> Self {
        self.layer = Layer::Derived;
        self
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layer = layer;
        self
    }

    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_partition_by(mut self, column: impl Into<String>) -> Self {
        self.partition_by = Some(column.into());
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_order(mut self, order: u64) -> Self {
        self.order = Some(order);
        self
    }
}

/// Result of one applied transform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformOutcome {
    pub column: String,
    pub layer: Layer,
    /// Stored type: the explicit type if given, else the inferred one.
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub inferred_type: ValueType,
    pub values: Vec<Value>,
    pub warnings: Vec<String>,
    pub stats: EvalStats,
    /// A record at the same layer was replaced.
    pub overwritten: bool,
    /// A working record now hides a derived one (or, for a derived
    /// transform, an existing working record hides the new one).
    pub shadowed: bool,
}

/// Undo log for storage without transactions.
#[derive(Debug, Default)]
struct UndoLog {
    steps: Vec<UndoStep>,
    touched: HashSet<String>,
}

#[derive(Debug)]
enum UndoStep {
    Added(String),
    Overwritten(String, Vec<Value>),
}

/// Orchestrates transforms over one storage backend.
///
/// Not re-entrant: callers serialize writes per table.
pub struct TransformPipeline<S: Storage> {
    storage: S,
    registry: Registry,
    evaluation: EvaluationSettings,
}

impl<S: Storage> TransformPipeline<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            registry: Registry::new(),
            evaluation: EvaluationSettings::default(),
        }
    }

    pub fn with_settings(storage: S, settings: &Settings) -> Self {
        Self {
            evaluation: settings.evaluation.clone(),
            ..Self::new(storage)
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Storage columns that no record defines.
    pub fn source_columns(&self, table: &str) -> Result<Vec<String>> {
        let records = self.registry.table(table);
        Ok(self
            .storage
            .columns(table)?
            .into_iter()
            .filter(|c| !records.is_some_and(|r| r.contains(c)))
            .collect())
    }

    pub fn execute_single_transform(
        &mut self,
        table: &str,
        spec: TransformSpec,
    ) -> Result<TransformOutcome> {
        let mut outcomes = self.execute_batch_transform(table, vec![spec])?;
        outcomes
            .pop()
            .ok_or_else(|| PrismError::Execution("Transform produced no outcome".to_string()))
    }

    /// Apply `specs` in order, all or nothing.
    ///
    /// Later items may reference columns created by earlier ones.
    pub fn execute_batch_transform(
        &mut self,
        table: &str,
        specs: Vec<TransformSpec>,
    ) -> Result<Vec<TransformOutcome>> {
        let snapshot = self.registry.table(table).cloned().unwrap_or_default();
        let mut undo = UndoLog::default();

        self.storage.begin()?;
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in &specs {
            match self.apply(table, spec, &mut undo) {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    warn!(table, column = %spec.column, error = %err, "Transform failed, rolling back batch");
                    self.abort(table, snapshot, undo);
                    return Err(err);
                }
            }
        }
        if let Err(err) = self.storage.commit() {
            self.abort(table, snapshot, undo);
            return Err(err);
        }

        info!(table, transforms = outcomes.len(), "Applied transforms");
        Ok(outcomes)
    }

    fn apply(
        &mut self,
        table: &str,
        spec: &TransformSpec,
        undo: &mut UndoLog,
    ) -> Result<TransformOutcome> {
        validate_column_name(&spec.column)?;
        if self.source_columns(table)?.contains(&spec.column) {
            return Err(PrismError::Name(format!(
                "Column '{}' already exists as a source column in table '{}'",
                spec.column, table
            )));
        }

        let ast = parse(&spec.expr)?;
        if let Some(filter) = &spec.filter {
            parse(filter)?;
        }

        let records = self.registry.table_mut(table);
        let order = spec.order.unwrap_or_else(|| records.next_order());
        let record = TransformRecord {
            column: spec.column.clone(),
            expr: spec.expr.clone(),
            value_type: spec.value_type.unwrap_or(ValueType::Numeric),
            layer: spec.layer,
            order,
            partition_by: spec.partition_by.clone(),
            filter: spec.filter.clone(),
        };
        self.check_cycles(table, &record)?;

        let rows = self.storage.rows(table)?;
        let options = EvalOptions {
            filter: spec.filter.clone(),
            partition_by: spec.partition_by.clone(),
            null_ratio_warning: self.evaluation.null_ratio_warning,
            columns: Some(self.storage.columns(table)?),
        };
        let evaluation = evaluate_ast(&ast, &rows, &options)?;
        let value_type = spec.value_type.unwrap_or(evaluation.inferred_type);

        let records = self.registry.table_mut(table);
        let hidden_by_working =
            spec.layer == Layer::Derived && records.get_layer(&spec.column, Layer::Working).is_some();
        let shadowed = match spec.layer {
            Layer::Working => records.get_derived(&spec.column).is_some(),
            Layer::Derived => hidden_by_working,
        };

        if hidden_by_working {
            debug!(table, column = %spec.column, "Derived column hidden by working override, not materialized");
        } else {
            self.write(table, &spec.column, &evaluation.values, undo)?;
        }

        let previous = self
            .registry
            .table_mut(table)
            .upsert(TransformRecord { value_type, ..record });
        let overwritten = previous.is_some();
        debug!(
            table,
            column = %spec.column,
            layer = %spec.layer,
            overwritten,
            shadowed,
            "Applied transform"
        );

        Ok(TransformOutcome {
            column: spec.column.clone(),
            layer: spec.layer,
            value_type,
            inferred_type: evaluation.inferred_type,
            values: evaluation.values,
            warnings: evaluation.warnings,
            stats: evaluation.stats,
            overwritten,
            shadowed,
        })
    }

    /// Fail if adding `record` to the table's records would close a cycle.
    fn check_cycles(&self, table: &str, record: &TransformRecord) -> Result<()> {
        let existing = self.registry.table(table);
        let others = existing
            .into_iter()
            .flat_map(|records| records.all())
            .filter(|r| !(r.column == record.column && r.layer == record.layer));
        let map = build_dependency_map(others.chain(std::iter::once(record)))?;
        match has_circular_dependency(&map) {
            Some(path) => Err(PrismError::Cycle { path }),
            None => Ok(()),
        }
    }

    /// Write a column, logging what manual undo would need.
    fn write(&mut self, table: &str, column: &str, values: &[Value], undo: &mut UndoLog) -> Result<()> {
        if !self.storage.supports_transactions() && undo.touched.insert(column.to_string()) {
            if self.storage.has_column(table, column)? {
                let previous = self
                    .storage
                    .rows(table)?
                    .into_iter()
                    .map(|mut row| row.remove(column).unwrap_or_default())
                    .collect();
                undo.steps.push(UndoStep::Overwritten(column.to_string(), previous));
            } else {
                undo.steps.push(UndoStep::Added(column.to_string()));
            }
        }
        self.storage.write_column(table, column, values)
    }

    /// Restore storage and records after a failed batch.
    fn abort(&mut self, table: &str, snapshot: TableRegistry, undo: UndoLog) {
        self.registry.replace_table(table, snapshot);

        if self.storage.supports_transactions() {
            if let Err(err) = self.storage.rollback() {
                warn!(table, error = %err, "Rollback failed");
            }
            return;
        }
        for step in undo.steps.into_iter().rev() {
            let result = match &step {
                UndoStep::Added(column) => self.storage.drop_column(table, column),
                UndoStep::Overwritten(column, values) => {
                    self.storage.write_column(table, column, values)
                }
            };
            if let Err(err) = result {
                warn!(table, ?step, error = %err, "Manual undo step failed");
            }
        }
        debug!(table, "Manually undid batch");
    }

    /// Move a working record to the derived layer.
    ///
    /// The materialized values are already the working ones, so storage is
    /// not touched. A previous derived definition is replaced.
    pub fn promote(&mut self, table: &str, column: &str) -> Result<TransformRecord> {
        let records = self.registry.table_mut(table);
        let record = records
            .get_layer(column, Layer::Working)
            .cloned()
            .ok_or_else(|| {
                PrismError::validation(format!(
                    "No working column '{}' in table '{}' to promote",
                    column, table
                ))
            })?;

        for dep in record_dependencies(&record)? {
            let working_only = records.get_layer(&dep, Layer::Working).is_some()
                && records.get_derived(&dep).is_none();
            if working_only {
                return Err(PrismError::validation(format!(
                    "Cannot promote '{}': it depends on working column '{}'. Promote '{}' first",
                    column, dep, dep
                )));
            }
        }

        records.remove(column, Layer::Working);
        let promoted = TransformRecord {
            layer: Layer::Derived,
            ..record
        };
        records.upsert(promoted.clone());
        info!(table, column, "Promoted column to derived");
        Ok(promoted)
    }

    /// Drop a column's records, or just one layer's record.
    ///
    /// When the column loses its last definition it is removed from storage,
    /// which is refused while other records depend on it. Dropping a working
    /// record that shadows a derived one re-materializes the derived values.
    pub fn drop(
        &mut self,
        table: &str,
        column: &str,
        layer: Option<Layer>,
    ) -> Result<Vec<TransformRecord>> {
        let snapshot = self.registry.table(table).cloned().unwrap_or_default();
        let layers: Vec<Layer> = match layer {
            Some(layer) => vec![layer],
            None => vec![Layer::Working, Layer::Derived],
        };
        let targets: Vec<Layer> = layers
            .into_iter()
            .filter(|l| snapshot.get_layer(column, *l).is_some())
            .collect();
        if targets.is_empty() {
            let scope = layer.map(|l| format!("{} ", l)).unwrap_or_default();
            return Err(PrismError::validation(format!(
                "No {}column '{}' in table '{}'",
                scope, column, table
            )));
        }

        let mut remaining = snapshot.clone();
        let removed: Vec<TransformRecord> = targets
            .iter()
            .filter_map(|l| remaining.remove(column, *l))
            .collect();

        let survivor = remaining.get(column).cloned();
        if survivor.is_none() {
            let map = build_dependency_map(remaining.all())?;
            let dependents = find_dependents(&map, column);
            if !dependents.is_empty() {
                return Err(PrismError::validation(format!(
                    "Cannot drop '{}': other columns depend on it ({})",
                    column,
                    dependents.into_iter().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        self.storage.begin()?;
        let result = match &survivor {
            None => self.storage.drop_column(table, column),
            Some(derived) if removed.iter().any(|r| r.layer == Layer::Working) => {
                self.rematerialize(table, derived)
            }
            Some(_) => Ok(()),
        };
        if let Err(err) = result.and_then(|_| self.storage.commit()) {
            if let Err(rollback) = self.storage.rollback() {
                warn!(table, error = %rollback, "Rollback failed");
            }
            return Err(err);
        }

        self.registry.replace_table(table, remaining);
        info!(table, column, dropped = removed.len(), "Dropped column records");
        Ok(removed)
    }

    fn rematerialize(&mut self, table: &str, record: &TransformRecord) -> Result<()> {
        let ast = parse(&record.expr)?;
        let rows = self.storage.rows(table)?;
        let options = EvalOptions {
            filter: record.filter.clone(),
            partition_by: record.partition_by.clone(),
            null_ratio_warning: self.evaluation.null_ratio_warning,
            columns: Some(self.storage.columns(table)?),
        };
        let evaluation = evaluate_ast(&ast, &rows, &options)?;
        debug!(table, column = %record.column, "Re-materialized derived column");
        self.storage
            .write_column(table, &record.column, &evaluation.values)
    }

    /// Records of a table, optionally restricted to one layer, in order.
    pub fn list(&self, table: &str, layer: Option<Layer>) -> Vec<TransformRecord> {
        self.registry
            .table(table)
            .map(|records| records.list(layer).into_iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The effective record for a column.
    pub fn get(&self, table: &str, column: &str) -> Option<&TransformRecord> {
        self.registry.table(table)?.get(column)
    }

    /// The derived record for a column, even while shadowed.
    pub fn get_derived(&self, table: &str, column: &str) -> Option<&TransformRecord> {
        self.registry.table(table)?.get_derived(column)
    }

    /// Forget every record of a table. Storage is left alone.
    pub fn drop_table(&mut self, table: &str) -> usize {
        let removed = self.registry.drop_table(table);
        info!(table, records = removed, "Dropped table records");
        removed
    }

    /// Derived records of every table, dependencies first.
    pub fn manifest(&self) -> Result<Manifest> {
        let mut manifest = Manifest::new();
        for table in self.registry.table_names() {
            let Some(records) = self.registry.table(table) else {
                continue;
            };
            let derived = records.list(Some(Layer::Derived));
            if derived.is_empty() {
                continue;
            }
            let map = build_dependency_map(derived.iter().copied())?;
            let entries = topological_sort(&map)?
                .into_iter()
                .filter_map(|column| records.get_derived(&column))
                .map(ManifestEntry::from_record)
                .collect();
            manifest.tables.insert(table.to_string(), entries);
        }
        Ok(manifest)
    }

    /// Columns defined by records of `table`, any layer.
    pub fn defined_columns(&self, table: &str) -> BTreeSet<String> {
        self.registry
            .table(table)
            .map(|records| records.all().map(|r| r.column.clone()).collect())
            .unwrap_or_default()
    }
}
