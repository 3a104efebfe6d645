//! Versioned manifest of derived columns.
//!
//! ```json
//! {
//!   "version": 1,
//!   "tables": {
//!     "grades": [
//!       { "column": "doubled", "expr": "score * 2", "type": "numeric" },
//!       { "column": "z", "expr": "zscore(doubled)", "type": "numeric", "partitionBy": "class" }
//!     ]
//!   }
//! }
//! ```
//!
//! Only derived records are listed, dependencies first, so replaying the
//! entries in file order rebuilds every column.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::pipeline::{TransformOutcome, TransformPipeline, TransformSpec};
use super::registry::TransformRecord;
use crate::error::{PrismError, Result};
use crate::expression::ValueType;
use crate::storage::Storage;

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub version: u32,
    #[serde(default)]
    pub tables: BTreeMap<String, Vec<ManifestEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub column: String,
    pub expr: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ManifestEntry {
    pub fn from_record(record: &TransformRecord) -> Self {
        Self {
            column: record.column.clone(),
            expr: record.expr.clone(),
            value_type: record.value_type,
            partition_by: record.partition_by.clone(),
            filter: record.filter.clone(),
        }
    }

    fn to_spec(&self) -> TransformSpec {
        TransformSpec {
            partition_by: self.partition_by.clone(),
            filter: self.filter.clone(),
            ..TransformSpec::new(&self.column, &self.expr)
                .derived()
                .with_type(self.value_type)
        }
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new()
    }
}

impl Manifest {
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            tables: BTreeMap::new(),
        }
    }

    pub fn entries(&self, table: &str) -> &[ManifestEntry] {
        self.tables.get(table).map(Vec::as_slice).unwrap_or_default()
    }

    /// Parse a manifest, rejecting versions this crate does not know.
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json)?;
        if manifest.version != MANIFEST_VERSION {
            return Err(PrismError::validation(format!(
                "Unsupported manifest version {} (expected {})",
                manifest.version, MANIFEST_VERSION
            )));
        }
        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.to_json()?)?;
        Ok(())
    }
}

/// Rebuild a table's derived columns from `manifest`.
///
/// The entries run in file order as one batch: either every column is
/// rebuilt or none is.
pub fn replay<S: Storage>(
    pipeline: &mut TransformPipeline<S>,
    manifest: &Manifest,
    table: &str,
) -> Result<Vec<TransformOutcome>> {
    let specs: Vec<TransformSpec> = manifest
        .entries(table)
        .iter()
        .map(ManifestEntry::to_spec)
        .collect();
    if specs.is_empty() {
        return Ok(Vec::new());
    }
    let outcomes = pipeline.execute_batch_transform(table, specs)?;
    info!(table, columns = outcomes.len(), "Replayed manifest");
    Ok(outcomes)
}
