//! Declarative query model.
//!
//! Queries arrive as JSON:
//!
//! ```json
//! {
//!   "select": ["region", {"field": "amount", "aggregate": "sum", "as": "total"}],
//!   "groupBy": ["region", {"field": "created", "bucket": "month"}],
//!   "filter": [{"field": "status", "op": "eq", "value": "paid"}],
//!   "having": [{"field": "total", "op": "gt", "value": 100}],
//!   "orderBy": [{"field": "total", "direction": "desc"}],
//!   "limit": 10
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::sql::TimeGrain;
use crate::value::Value;

/// A declarative analytic query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub select: Vec<SelectField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub join: Vec<JoinClause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<GroupField>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub having: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

/// One entry of the select list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectField {
    /// Pass-through column, `column` or `table.column`.
    Column(String),
    Window(WindowField),
    Aggregate(AggregateField),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateField {
    /// Source column, or `*` for `count`.
    pub field: String,
    pub aggregate: Aggregate,
    #[serde(rename = "as")]
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
}

impl AggregateField {
    /// Quantile fraction this aggregate computes, for the order-statistic
    /// aggregates.
    pub fn fraction(&self) -> Option<f64> {
        match self.aggregate {
            Aggregate::Median => Some(0.5),
            Aggregate::P25 => Some(0.25),
            Aggregate::P75 => Some(0.75),
            Aggregate::Percentile => self.percentile,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
    Median,
    P25,
    P75,
    Stddev,
    Percentile,
}

impl Aggregate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Count => "count",
            Aggregate::CountDistinct => "count_distinct",
            Aggregate::Median => "median",
            Aggregate::P25 => "p25",
            Aggregate::P75 => "p75",
            Aggregate::Stddev => "stddev",
            Aggregate::Percentile => "percentile",
        }
    }

    pub fn requires_numeric(&self) -> bool {
        !matches!(
            self,
            Aggregate::Count | Aggregate::CountDistinct | Aggregate::Min | Aggregate::Max
        )
    }

    /// Statistics not every engine computes natively.
    pub fn is_order_statistic(&self) -> bool {
        matches!(
            self,
            Aggregate::Median
                | Aggregate::P25
                | Aggregate::P75
                | Aggregate::Stddev
                | Aggregate::Percentile
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowField {
    pub window: WindowFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(rename = "as")]
    pub alias: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partition_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,
    /// Row offset for `lag`/`lead`, default 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
    /// Value for `lag`/`lead` when the offset row does not exist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowFunction {
    Lag,
    Lead,
    Rank,
    DenseRank,
    RowNumber,
    RunningSum,
    RunningAvg,
    PctOfTotal,
}

impl WindowFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowFunction::Lag => "lag",
            WindowFunction::Lead => "lead",
            WindowFunction::Rank => "rank",
            WindowFunction::DenseRank => "dense_rank",
            WindowFunction::RowNumber => "row_number",
            WindowFunction::RunningSum => "running_sum",
            WindowFunction::RunningAvg => "running_avg",
            WindowFunction::PctOfTotal => "pct_of_total",
        }
    }

    pub fn requires_field(&self) -> bool {
        matches!(
            self,
            WindowFunction::Lag
                | WindowFunction::Lead
                | WindowFunction::RunningSum
                | WindowFunction::RunningAvg
                | WindowFunction::PctOfTotal
        )
    }

    pub fn requires_order(&self) -> bool {
        !matches!(self, WindowFunction::PctOfTotal)
    }
}

/// A `groupBy` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupField {
    Column(String),
    Bucketed { field: String, bucket: TimeGrain },
}

impl GroupField {
    pub fn field(&self) -> &str {
        match self {
            GroupField::Column(name) => name,
            GroupField::Bucketed { field, .. } => field,
        }
    }

    pub fn bucket(&self) -> Option<TimeGrain> {
        match self {
            GroupField::Column(_) => None,
            GroupField::Bucketed { bucket, .. } => Some(*bucket),
        }
    }
}

/// Output name of a bucketed group field: `{column}_{bucket}`.
pub fn bucket_alias(field: &str, bucket: TimeGrain) -> String {
    format!("{}_{}", last_segment(field), bucket)
}

/// `orders.amount` -> `amount`.
pub fn last_segment(reference: &str) -> &str {
    reference
        .rsplit_once('.')
        .map_or(reference, |(_, column)| column)
}

/// Split `table.column` into its parts; unqualified names have no table.
pub fn split_reference(reference: &str) -> (Option<&str>, &str) {
    match reference.split_once('.') {
        Some((table, column)) => (Some(table), column),
        None => (None, reference),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinClause {
    pub table: String,
    pub on: JoinOn,
    #[serde(rename = "type", default)]
    pub join_type: JoinKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinOn {
    pub left: String,
    pub right: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinKind {
    #[default]
    Inner,
    Left,
}

/// A filter or having condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub op: FilterOp,
    /// An explicit `null` is kept as a null scalar (`eq null` means IS NULL);
    /// only an absent key is `None`.
    #[serde(
        default,
        deserialize_with = "explicit_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<PredicateValue>,
}

fn explicit_value<'de, D>(deserializer: D) -> Result<Option<PredicateValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    PredicateValue::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    Between,
    IsNull,
    IsNotNull,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
            FilterOp::Contains => "contains",
            FilterOp::Between => "between",
            FilterOp::IsNull => "is_null",
            FilterOp::IsNotNull => "is_not_null",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateValue {
    List(Vec<Value>),
    Scalar(Value),
}

/// An ORDER BY entry. Deserializes from `"field"` or
/// `{"field": ..., "direction": "asc" | "desc"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "OrderByRepr")]
pub struct OrderBy {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl OrderBy {
    pub fn asc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        Self {
            field: field.to_string(),
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OrderByRepr {
    Field(String),
    Full {
        field: String,
        #[serde(default)]
        direction: SortDirection,
    },
}

impl From<OrderByRepr> for OrderBy {
    fn from(repr: OrderByRepr) -> Self {
        match repr {
            OrderByRepr::Field(field) => OrderBy {
                field,
                direction: SortDirection::Asc,
            },
            OrderByRepr::Full { field, direction } => OrderBy { field, direction },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One column of a query's result, in output order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputItem<'a> {
    /// Pass-through column; output name is the reference as written.
    Column(&'a str),
    Bucket {
        field: &'a str,
        bucket: TimeGrain,
    },
    Aggregate(&'a AggregateField),
    Window(&'a WindowField),
}

impl OutputItem<'_> {
    pub fn name(&self) -> String {
        match self {
            OutputItem::Column(reference) => reference.to_string(),
            OutputItem::Bucket { field, bucket } => bucket_alias(field, *bucket),
            OutputItem::Aggregate(agg) => agg.alias.clone(),
            OutputItem::Window(win) => win.alias.clone(),
        }
    }
}

impl Query {
    pub fn aggregates(&self) -> impl Iterator<Item = &AggregateField> {
        self.select.iter().filter_map(|s| match s {
            SelectField::Aggregate(agg) => Some(agg),
            _ => None,
        })
    }

    pub fn windows(&self) -> impl Iterator<Item = &WindowField> {
        self.select.iter().filter_map(|s| match s {
            SelectField::Window(win) => Some(win),
            _ => None,
        })
    }

    /// Pass-through column references in the select list.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.select.iter().filter_map(|s| match s {
            SelectField::Column(name) => Some(name.as_str()),
            _ => None,
        })
    }

    pub fn has_aggregates(&self) -> bool {
        self.aggregates().next().is_some()
    }

    /// Rows are collapsed into groups when there are aggregates or an
    /// explicit `groupBy`.
    pub fn is_grouped(&self) -> bool {
        self.has_aggregates() || !self.group_by.is_empty()
    }

    /// Result columns in order.
    ///
    /// A bucketed group field whose base column is selected takes that
    /// column's place; unselected bucketed fields come first.
    pub fn output_items(&self) -> Vec<OutputItem<'_>> {
        let buckets: Vec<(&str, TimeGrain)> = self
            .group_by
            .iter()
            .filter_map(|g| g.bucket().map(|b| (g.field(), b)))
            .collect();

        let mut items: Vec<OutputItem<'_>> = buckets
            .iter()
            .filter(|(field, _)| !self.columns().any(|c| same_column(c, field)))
            .map(|(field, bucket)| OutputItem::Bucket {
                field: *field,
                bucket: *bucket,
            })
            .collect();

        for select in &self.select {
            items.push(match select {
                SelectField::Column(name) => {
                    match buckets.iter().find(|(field, _)| same_column(name, field)) {
                        Some((field, bucket)) => OutputItem::Bucket {
                            field: *field,
                            bucket: *bucket,
                        },
                        None => OutputItem::Column(name.as_str()),
                    }
                }
                SelectField::Aggregate(agg) => OutputItem::Aggregate(agg),
                SelectField::Window(win) => OutputItem::Window(win),
            });
        }
        items
    }

    /// Names of the result columns, identical for the SQL and fallback paths.
    pub fn output_columns(&self) -> Vec<String> {
        self.output_items().iter().map(OutputItem::name).collect()
    }

    /// Output names visible to window functions: everything except the
    /// windows themselves.
    pub fn base_output_columns(&self) -> Vec<String> {
        self.output_items()
            .iter()
            .filter(|item| !matches!(item, OutputItem::Window(_)))
            .map(OutputItem::name)
            .collect()
    }
}

/// Whether two references name the same column, allowing one side to be
/// unqualified.
pub(crate) fn same_column(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (split_reference(a), split_reference(b)) {
        ((Some(_), x), (None, y)) | ((None, x), (Some(_), y)) => x == y,
        _ => false,
    }
}

/// Resolve a window or ordering reference against output names. Exact
/// matches win; otherwise the unqualified form of a dotted output name is
/// accepted when it is unique.
pub(crate) fn resolve_output<'a>(name: &str, outputs: &'a [String]) -> Option<&'a str> {
    if let Some(exact) = outputs.iter().find(|o| o.as_str() == name) {
        return Some(exact);
    }
    let mut matches = outputs
        .iter()
        .filter(|o| o.contains('.') && last_segment(o) == name);
    match (matches.next(), matches.next()) {
        (Some(only), None) => Some(only),
        _ => None,
    }
}
