//! Schema validation for declarative queries.
//!
//! Checks run in a fixed order and stop at the first violation: joins,
//! then select, groupBy, filter, having, orderBy. Messages name the
//! closest match (when one is within the edit-distance threshold) and list
//! the available alternatives.
//!
//! [`correct_query`] rewrites misspelled names that have exactly one close
//! match, so a caller can accept the corrections and validate again.

use std::collections::HashSet;

use tracing::debug;

use super::model::{
    resolve_output, split_reference, Aggregate, FilterOp, GroupField, OutputItem, Predicate,
    PredicateValue, Query, SelectField,
};
use crate::config::ValidationSettings;
use crate::error::{PrismError, Result};
use crate::fuzzy::{did_you_mean, levenshtein, suggest};
use crate::schema::{Column, ColumnType, Schema, Table};
use crate::sql::TimeGrain;

/// Validate `query` against `schema` with the default threshold.
pub fn validate_query(schema: &Schema, base_table: &str, query: &Query) -> Result<()> {
    validate_query_with(schema, base_table, query, &ValidationSettings::default())
}

/// Validate `query` against `schema`.
///
/// Never mutates the query; validating the same query twice gives the same
/// result.
pub fn validate_query_with(
    schema: &Schema,
    base_table: &str,
    query: &Query,
    settings: &ValidationSettings,
) -> Result<()> {
    let result = Validator::new(schema, base_table, query, settings.fuzzy_threshold)
        .and_then(|mut validator| validator.run());
    if let Err(err) = &result {
        debug!(table = base_table, error = %err, "query rejected");
    }
    result
}

/// Outcome of looking up a field reference among the tables in scope.
enum Lookup<'a> {
    Found(&'a Column),
    Ambiguous(Vec<&'a str>),
    Missing,
}

struct Validator<'a> {
    schema: &'a Schema,
    query: &'a Query,
    /// Base table first, then joined tables in join order.
    scope: Vec<&'a Table>,
    threshold: usize,
}

impl<'a> Validator<'a> {
    fn new(
        schema: &'a Schema,
        base_table: &str,
        query: &'a Query,
        threshold: usize,
    ) -> Result<Self> {
        let base = find_table(schema, base_table, threshold)?;
        Ok(Self {
            schema,
            query,
            scope: vec![base],
            threshold,
        })
    }

    fn run(&mut self) -> Result<()> {
        if self.query.select.is_empty() {
            return Err(PrismError::validation(
                "Query must select at least one field",
            ));
        }
        self.check_joins()?;
        self.check_select()?;
        self.check_group_by()?;
        for predicate in &self.query.filter {
            self.resolve_field(&predicate.field)?;
            check_predicate_value(predicate)?;
        }
        self.check_having()?;
        self.check_order_by()
    }

    // ========================================================================
    // Joins
    // ========================================================================

    fn check_joins(&mut self) -> Result<()> {
        for (i, join) in self.query.join.iter().enumerate() {
            let table = find_table(self.schema, &join.table, self.threshold)?;
            if self.scope.iter().any(|t| t.name == table.name) {
                return Err(PrismError::validation(format!(
                    "Table '{}' appears more than once in this query",
                    table.name
                )));
            }

            match split_reference(&join.on.left) {
                (Some(_), _) => self.check_join_qualified(&join.on.left, table)?,
                (None, column) if i == 0 => {
                    self.column_in(self.scope[0], column)?;
                }
                (None, _) => {
                    return Err(PrismError::validation(format!(
                        "Join condition '{}' must be qualified as table.column when joining more than one table",
                        join.on.left
                    )))
                }
            }
            match split_reference(&join.on.right) {
                (Some(_), _) => self.check_join_qualified(&join.on.right, table)?,
                (None, column) => {
                    self.column_in(table, column)?;
                }
            }

            self.scope.push(table);
        }
        Ok(())
    }

    fn check_join_qualified(&self, reference: &str, joining: &'a Table) -> Result<()> {
        let (table_name, column) = split_reference(reference);
        let table_name = table_name.unwrap_or_default();
        let candidates: Vec<&'a Table> = self
            .scope
            .iter()
            .copied()
            .chain(std::iter::once(joining))
            .collect();
        match candidates.iter().copied().find(|t| t.name == table_name) {
            Some(table) => self.column_in(table, column).map(|_| ()),
            None => Err(self.table_out_of_scope(table_name, &candidates)),
        }
    }

    // ========================================================================
    // Select
    // ========================================================================

    fn check_select(&self) -> Result<()> {
        let base_outputs = self.query.base_output_columns();

        for field in &self.query.select {
            match field {
                SelectField::Column(reference) => {
                    self.resolve_field(reference)?;
                }
                SelectField::Aggregate(agg) => {
                    let name = agg.aggregate.as_str();
                    if agg.alias.trim().is_empty() {
                        return Err(PrismError::validation(format!(
                            "Aggregate '{}' on '{}' requires a non-empty 'as' alias",
                            name, agg.field
                        )));
                    }
                    if agg.field == "*" {
                        if agg.aggregate != Aggregate::Count {
                            return Err(PrismError::validation(format!(
                                "'*' can only be used with the count aggregate, not '{}'",
                                name
                            )));
                        }
                    } else {
                        let column = self.resolve_field(&agg.field)?;
                        if agg.aggregate.requires_numeric() && !column.is_numeric() {
                            return Err(PrismError::validation(format!(
                                "Aggregate '{}' requires a numeric column, but '{}' is {}",
                                name, agg.field, column.column_type
                            )));
                        }
                    }
                    if agg.aggregate == Aggregate::Percentile {
                        match agg.percentile {
                            None => {
                                return Err(PrismError::validation(format!(
                                    "Aggregate 'percentile' on '{}' requires a 'percentile' value between 0 and 1",
                                    agg.field
                                )))
                            }
                            Some(p) if !(0.0..=1.0).contains(&p) => {
                                return Err(PrismError::validation(format!(
                                    "Percentile must be between 0 and 1, got {}",
                                    p
                                )))
                            }
                            Some(_) => {}
                        }
                    }
                }
                SelectField::Window(win) => {
                    let name = win.window.as_str();
                    if win.alias.trim().is_empty() {
                        return Err(PrismError::validation(format!(
                            "Window function '{}' requires a non-empty 'as' alias",
                            name
                        )));
                    }
                    if win.window.requires_field() && win.field.is_none() {
                        return Err(PrismError::validation(format!(
                            "Window function '{}' requires a 'field'",
                            name
                        )));
                    }
                    if win.window.requires_order() && win.order_by.is_empty() {
                        return Err(PrismError::validation(format!(
                            "Window function '{}' requires a non-empty 'orderBy'",
                            name
                        )));
                    }
                    let referenced = win
                        .field
                        .iter()
                        .chain(&win.partition_by)
                        .chain(win.order_by.iter().map(|o| &o.field));
                    for reference in referenced {
                        if resolve_output(reference, &base_outputs).is_none() {
                            let suggestion = suggest(
                                reference,
                                base_outputs.iter().map(String::as_str),
                                self.threshold,
                            );
                            return Err(PrismError::validation_with(
                                format!(
                                    "Window '{}' references '{}', which is not in the query output.{} Available: {}",
                                    win.alias,
                                    reference,
                                    did_you_mean(suggestion.as_deref()),
                                    list_or_none(&base_outputs)
                                ),
                                suggestion,
                            ));
                        }
                    }
                }
            }
        }

        let mut seen = HashSet::new();
        for item in self.query.output_items() {
            let name = item.name();
            if !seen.insert(name.clone()) {
                let what = match item {
                    OutputItem::Aggregate(_) | OutputItem::Window(_) => "alias",
                    _ => "output column",
                };
                return Err(PrismError::validation(format!(
                    "Duplicate {} '{}' in select",
                    what, name
                )));
            }
        }
        Ok(())
    }

    // ========================================================================
    // Group by / having / order by
    // ========================================================================

    fn check_group_by(&self) -> Result<()> {
        for group in &self.query.group_by {
            let column = self.resolve_field(group.field())?;
            if let Some(bucket) = group.bucket() {
                let integer_year = bucket == TimeGrain::Year && column.is_integer_year();
                if column.column_type != ColumnType::Date && !integer_year {
                    return Err(PrismError::validation(format!(
                        "Bucket '{}' can only be applied to date columns, but '{}' is {}",
                        bucket,
                        group.field(),
                        column.column_type
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_having(&self) -> Result<()> {
        let aliases: Vec<&str> = self.query.aggregates().map(|a| a.alias.as_str()).collect();
        for predicate in &self.query.having {
            if !aliases.contains(&predicate.field.as_str()) {
                let suggestion = suggest(&predicate.field, aliases.iter().copied(), self.threshold);
                let available = if aliases.is_empty() {
                    "none".to_string()
                } else {
                    aliases.join(", ")
                };
                return Err(PrismError::validation_with(
                    format!(
                        "HAVING field '{}' must reference an aggregate alias.{} Available aggregates: {}",
                        predicate.field,
                        did_you_mean(suggestion.as_deref()),
                        available
                    ),
                    suggestion,
                ));
            }
            check_predicate_value(predicate)?;
        }
        Ok(())
    }

    fn check_order_by(&self) -> Result<()> {
        let outputs = self.query.output_columns();
        let has_windows = self.query.windows().next().is_some();

        for order in &self.query.order_by {
            if resolve_output(&order.field, &outputs).is_some() {
                continue;
            }
            if !has_windows {
                match self.lookup(&order.field) {
                    Lookup::Found(_) if !self.query.is_grouped() => continue,
                    Lookup::Found(_) => {
                        let grouped = self
                            .query
                            .group_by
                            .iter()
                            .any(|g| g.bucket().is_none() && g.field() == order.field);
                        if grouped {
                            continue;
                        }
                        return Err(PrismError::validation(format!(
                            "Cannot order by '{}': a grouped query can only order by output columns or groupBy fields. Available: {}",
                            order.field,
                            list_or_none(&outputs)
                        )));
                    }
                    Lookup::Ambiguous(tables) => {
                        return Err(ambiguous(&order.field, &tables));
                    }
                    Lookup::Missing => {}
                }
            }

            let mut candidates: Vec<&str> = outputs.iter().map(String::as_str).collect();
            if !has_windows {
                for table in &self.scope {
                    candidates.extend(table.column_names());
                }
            }
            let suggestion = suggest(&order.field, candidates.iter().copied(), self.threshold);
            let context = if has_windows {
                " (queries with window functions order by output columns)"
            } else {
                ""
            };
            return Err(PrismError::validation_with(
                format!(
                    "Cannot order by '{}'{}.{} Available: {}",
                    order.field,
                    context,
                    did_you_mean(suggestion.as_deref()),
                    list_or_none(&outputs)
                ),
                suggestion,
            ));
        }
        Ok(())
    }

    // ========================================================================
    // Field resolution
    // ========================================================================

    fn lookup(&self, reference: &str) -> Lookup<'a> {
        match split_reference(reference) {
            (Some(table_name), column) => self
                .scope
                .iter()
                .copied()
                .find(|t| t.name == table_name)
                .and_then(|t| t.column(column))
                .map_or(Lookup::Missing, Lookup::Found),
            (None, column) => {
                let found: Vec<(&'a Table, &'a Column)> = self
                    .scope
                    .iter()
                    .copied()
                    .filter_map(|t| t.column(column).map(|c| (t, c)))
                    .collect();
                match found.as_slice() {
                    [] => Lookup::Missing,
                    [(_, only)] => Lookup::Found(only),
                    many => Lookup::Ambiguous(many.iter().map(|(t, _)| t.name.as_str()).collect()),
                }
            }
        }
    }

    fn resolve_field(&self, reference: &str) -> Result<&'a Column> {
        match self.lookup(reference) {
            Lookup::Found(column) => Ok(column),
            Lookup::Ambiguous(tables) => Err(ambiguous(reference, &tables)),
            Lookup::Missing => match split_reference(reference) {
                (Some(table_name), column) => {
                    match self.scope.iter().copied().find(|t| t.name == table_name) {
                        Some(table) => self.column_in(table, column),
                        None => Err(self.table_out_of_scope(table_name, &self.scope)),
                    }
                }
                (None, column) if self.scope.len() == 1 => self.column_in(self.scope[0], column),
                (None, column) => {
                    let available: Vec<&str> =
                        self.scope.iter().flat_map(|t| t.column_names()).collect();
                    let tables: Vec<String> =
                        self.scope.iter().map(|t| format!("'{}'", t.name)).collect();
                    let suggestion = suggest(column, available.iter().copied(), self.threshold);
                    Err(PrismError::validation_with(
                        format!(
                            "Field '{}' not found in tables {}.{} Available columns: {}",
                            column,
                            tables.join(", "),
                            did_you_mean(suggestion.as_deref()),
                            available.join(", ")
                        ),
                        suggestion,
                    ))
                }
            },
        }
    }

    fn column_in(&self, table: &'a Table, column: &str) -> Result<&'a Column> {
        table.column(column).ok_or_else(|| {
            let available = table.column_names();
            let suggestion = suggest(column, available.iter().copied(), self.threshold);
            PrismError::validation_with(
                format!(
                    "Field '{}' not found in table '{}'.{} Available columns: {}",
                    column,
                    table.name,
                    did_you_mean(suggestion.as_deref()),
                    available.join(", ")
                ),
                suggestion,
            )
        })
    }

    fn table_out_of_scope(&self, table_name: &str, scope: &[&Table]) -> PrismError {
        let names: Vec<&str> = scope.iter().map(|t| t.name.as_str()).collect();
        let suggestion = suggest(table_name, names.iter().copied(), self.threshold);
        PrismError::validation_with(
            format!(
                "Table '{}' is not part of this query.{} Available tables: {}",
                table_name,
                did_you_mean(suggestion.as_deref()),
                names.join(", ")
            ),
            suggestion,
        )
    }
}

fn find_table<'s>(schema: &'s Schema, name: &str, threshold: usize) -> Result<&'s Table> {
    schema.table(name).ok_or_else(|| {
        let names = schema.table_names();
        let suggestion = suggest(name, names.iter().copied(), threshold);
        PrismError::validation_with(
            format!(
                "Table '{}' not found.{} Available tables: {}",
                name,
                did_you_mean(suggestion.as_deref()),
                list_or_none(&names)
            ),
            suggestion,
        )
    })
}

fn ambiguous(reference: &str, tables: &[&str]) -> PrismError {
    PrismError::validation(format!(
        "Field '{}' is ambiguous: it exists in tables {}. Qualify it as table.column",
        reference,
        tables.join(", ")
    ))
}

fn check_predicate_value(predicate: &Predicate) -> Result<()> {
    let op = predicate.op.as_str();
    let problem = match (predicate.op, &predicate.value) {
        (FilterOp::IsNull | FilterOp::IsNotNull, _) => None,
        (FilterOp::In | FilterOp::NotIn, Some(PredicateValue::List(_))) => None,
        (FilterOp::In | FilterOp::NotIn, _) => Some("requires a list value"),
        (FilterOp::Between, Some(PredicateValue::List(values))) if values.len() == 2 => None,
        (FilterOp::Between, _) => Some("requires a list of exactly two values"),
        (_, Some(PredicateValue::Scalar(_))) => None,
        (_, Some(PredicateValue::List(_))) => Some("requires a single value, not a list"),
        (_, None) => Some("requires a value"),
    };
    match problem {
        Some(problem) => Err(PrismError::validation(format!(
            "Operator '{}' on '{}' {}",
            op, predicate.field, problem
        ))),
        None => Ok(()),
    }
}

fn list_or_none<S: AsRef<str>>(items: &[S]) -> String {
    if items.is_empty() {
        return "none".to_string();
    }
    items
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// Correction
// ============================================================================

/// A field name rewritten by [`correct_query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub original: String,
    pub corrected: String,
}

/// Rewrite unknown names that have exactly one closest match within the
/// default threshold.
pub fn correct_query(schema: &Schema, base_table: &str, query: &Query) -> (Query, Vec<Correction>) {
    correct_query_with(schema, base_table, query, &ValidationSettings::default())
}

/// Rewrite unknown names that have exactly one closest match.
///
/// Column references are matched against the columns of the base and
/// joined tables, having fields against aggregate aliases, window
/// references against the base output names. Names that already resolve,
/// and names with no unique match, are left alone.
pub fn correct_query_with(
    schema: &Schema,
    base_table: &str,
    query: &Query,
    settings: &ValidationSettings,
) -> (Query, Vec<Correction>) {
    let mut corrected = query.clone();
    let mut corrections = Vec::new();
    let threshold = settings.fuzzy_threshold;

    let tables: Vec<&Table> = std::iter::once(base_table)
        .chain(query.join.iter().map(|j| j.table.as_str()))
        .filter_map(|name| schema.table(name))
        .collect();

    let mut fix_column = |reference: &mut String| {
        let replacement = match split_reference(reference) {
            (Some(table_name), column) => tables
                .iter()
                .find(|t| t.name == table_name)
                .filter(|t| !t.has_column(column))
                .and_then(|t| unique_match(column, t.column_names(), threshold))
                .map(|c| format!("{}.{}", table_name, c)),
            (None, column) => {
                if tables.iter().any(|t| t.has_column(column)) {
                    None
                } else {
                    let mut all: Vec<&str> = tables.iter().flat_map(|t| t.column_names()).collect();
                    let mut seen = HashSet::new();
                    all.retain(|c| seen.insert(*c));
                    unique_match(column, all, threshold)
                }
            }
        };
        if let Some(replacement) = replacement {
            corrections.push(Correction {
                original: reference.clone(),
                corrected: replacement.clone(),
            });
            *reference = replacement;
        }
    };

    for field in &mut corrected.select {
        match field {
            SelectField::Column(reference) => fix_column(reference),
            SelectField::Aggregate(agg) if agg.field != "*" => fix_column(&mut agg.field),
            _ => {}
        }
    }
    for group in &mut corrected.group_by {
        match group {
            GroupField::Column(reference) => fix_column(reference),
            GroupField::Bucketed { field, .. } => fix_column(field),
        }
    }
    for predicate in &mut corrected.filter {
        fix_column(&mut predicate.field);
    }

    // Output names depend on the corrected columns.
    let aliases: Vec<String> = corrected.aggregates().map(|a| a.alias.clone()).collect();
    let base_outputs = corrected.base_output_columns();
    let outputs = corrected.output_columns();

    let mut fix_name = |name: &mut String, candidates: &[String]| {
        if resolve_output(name, candidates).is_some() {
            return;
        }
        if let Some(replacement) =
            unique_match(name, candidates.iter().map(String::as_str), threshold)
        {
            corrections.push(Correction {
                original: name.clone(),
                corrected: replacement.clone(),
            });
            *name = replacement;
        }
    };

    for field in &mut corrected.select {
        if let SelectField::Window(win) = field {
            if let Some(reference) = win.field.as_mut() {
                fix_name(reference, &base_outputs);
            }
            for reference in &mut win.partition_by {
                fix_name(reference, &base_outputs);
            }
            for order in &mut win.order_by {
                fix_name(&mut order.field, &base_outputs);
            }
        }
    }
    for predicate in &mut corrected.having {
        fix_name(&mut predicate.field, &aliases);
    }
    let column_names: HashSet<&str> = tables.iter().flat_map(|t| t.column_names()).collect();
    for order in &mut corrected.order_by {
        if !column_names.contains(order.field.as_str()) {
            fix_name(&mut order.field, &outputs);
        }
    }

    if !corrections.is_empty() {
        debug!(count = corrections.len(), "query corrected");
    }
    (corrected, corrections)
}

/// The single candidate at minimal edit distance, if it is within the
/// threshold and no other candidate ties with it.
fn unique_match<'c>(
    target: &str,
    candidates: impl IntoIterator<Item = &'c str>,
    threshold: usize,
) -> Option<String> {
    let target = target.to_lowercase();
    let mut best: Option<(usize, &str)> = None;
    let mut tied = false;
    for candidate in candidates {
        let distance = levenshtein(&target, &candidate.to_lowercase());
        if distance > threshold {
            continue;
        }
        match best {
            Some((d, _)) if distance == d => tied = true,
            Some((d, _)) if distance > d => {}
            _ => {
                best = Some((distance, candidate));
                tied = false;
            }
        }
    }
    if tied {
        return None;
    }
    best.map(|(_, name)| name.to_string())
}
