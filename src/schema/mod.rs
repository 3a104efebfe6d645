//! Schema model: table and column metadata.
//!
//! A [`Schema`] is an immutable snapshot. Storage backends rebuild it on
//! demand through [`SchemaProvider`], so derived and working columns show up
//! as soon as they are materialized.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PrismError, Result};
use crate::value::{looks_like_date, Row, Value};

/// Number of distinct sample values kept per column.
const SAMPLE_SIZE: usize = 5;

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Date,
    Id,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Numeric => "numeric",
            ColumnType::Categorical => "categorical",
            ColumnType::Date => "date",
            ColumnType::Id => "id",
            ColumnType::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub sample_values: Vec<Value>,
    #[serde(default)]
    pub unique_count: usize,
    #[serde(default)]
    pub null_count: usize,
    #[serde(default)]
    pub total_count: usize,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            sample_values: Vec::new(),
            unique_count: 0,
            null_count: 0,
            total_count: 0,
        }
    }

    pub fn with_samples(mut self, samples: Vec<Value>) -> Self {
        self.sample_values = samples;
        self
    }

    /// Profile a column from its values.
    pub fn profile(name: &str, values: &[Value]) -> Self {
        let non_null: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
        let mut seen = HashSet::new();
        let mut samples = Vec::new();
        for value in &non_null {
            if seen.insert(value.group_key()) && samples.len() < SAMPLE_SIZE {
                samples.push((*value).clone());
            }
        }

        Self {
            name: name.to_string(),
            column_type: detect_type(name, &non_null, seen.len()),
            sample_values: samples,
            unique_count: seen.len(),
            null_count: values.len() - non_null.len(),
            total_count: values.len(),
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.column_type == ColumnType::Numeric
    }

    /// A numeric column holding calendar years (integers in 1000..=9999).
    pub fn is_integer_year(&self) -> bool {
        self.is_numeric()
            && !self.sample_values.is_empty()
            && self.sample_values.iter().all(|v| {
                v.to_number()
                    .is_some_and(|n| n.fract() == 0.0 && (1000.0..=9999.0).contains(&n))
            })
    }
}

fn detect_type(name: &str, non_null: &[&Value], unique: usize) -> ColumnType {
    if non_null.is_empty() {
        return ColumnType::Categorical;
    }

    let all_numeric = non_null
        .iter()
        .all(|v| matches!(v, Value::Number(_) | Value::Text(_)) && v.to_number().is_some());
    if all_numeric {
        let lower = name.to_lowercase();
        let id_like = lower == "id" || lower.ends_with("_id");
        let integral = non_null
            .iter()
            .all(|v| v.to_number().is_some_and(|n| n.fract() == 0.0));
        if id_like && integral && unique == non_null.len() {
            return ColumnType::Id;
        }
        return ColumnType::Numeric;
    }

    let all_dates = non_null
        .iter()
        .all(|v| matches!(v, Value::Text(s) if looks_like_date(s)));
    if all_dates {
        return ColumnType::Date;
    }

    let unique_ratio = unique as f64 / non_null.len() as f64;
    let avg_len = non_null
        .iter()
        .map(|v| v.to_string().chars().count())
        .sum::<usize>() as f64
        / non_null.len() as f64;
    if unique_ratio > 0.9 && avg_len > 30.0 {
        ColumnType::Text
    } else {
        ColumnType::Categorical
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub row_count: usize,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            row_count: 0,
            columns: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Build table metadata by profiling every column of `rows`.
    pub fn profile(name: &str, columns: &[String], rows: &[Row]) -> Self {
        let columns = columns
            .iter()
            .map(|col| {
                let values: Vec<Value> = rows
                    .iter()
                    .map(|row| row.get(col).cloned().unwrap_or_default())
                    .collect();
                Column::profile(col, &values)
            })
            .collect();
        Self {
            name: name.to_string(),
            row_count: rows.len(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// A set of tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<Table>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.push(table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.name.as_str()).collect()
    }
}

/// Source of schema snapshots.
pub trait SchemaProvider {
    /// Current schema for every table.
    fn schema(&self) -> Result<Schema>;

    /// Current metadata for one table.
    fn table_schema(&self, table: &str) -> Result<Table> {
        self.schema()?
            .tables
            .into_iter()
            .find(|t| t.name == table)
            .ok_or_else(|| PrismError::Execution(format!("Table '{}' does not exist", table)))
    }
}
