//! Dependency graph over derived column definitions.
//!
//! A [`DependencyMap`] maps each defined column to the columns its
//! expression, filter and partition reference. Edges in the petgraph view
//! point from a dependency to its dependent, so a topological order lists
//! dependencies first.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use super::registry::TransformRecord;
use crate::error::{PrismError, Result};
use crate::expression::parse;

/// `column -> columns it references`.
pub type DependencyMap = BTreeMap<String, BTreeSet<String>>;

/// Column names referenced by an expression, unique, in order of appearance.
pub fn extract_column_refs(expr: &str) -> Result<Vec<String>> {
    Ok(parse(expr)?.column_refs())
}

/// References of one record: expression, filter and partition column.
pub fn record_dependencies(record: &TransformRecord) -> Result<BTreeSet<String>> {
    let mut deps: BTreeSet<String> = extract_column_refs(&record.expr)?.into_iter().collect();
    if let Some(filter) = &record.filter {
        deps.extend(extract_column_refs(filter)?);
    }
    if let Some(partition) = &record.partition_by {
        deps.insert(partition.clone());
    }
    Ok(deps)
}

/// Build the dependency map for a set of records.
///
/// A column defined at both layers gets the union of both definitions'
/// references, so a cycle through either definition is detected.
pub fn build_dependency_map<'a, I>(records: I) -> Result<DependencyMap>
where
    I: IntoIterator<Item = &'a TransformRecord>,
{
    let mut map = DependencyMap::new();
    for record in records {
        let deps = record_dependencies(record)?;
        map.entry(record.column.clone()).or_default().extend(deps);
    }
    Ok(map)
}

/// Every column that depends on `column`, directly or transitively.
pub fn find_dependents(map: &DependencyMap, column: &str) -> BTreeSet<String> {
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(column.to_string());

    while let Some(current) = queue.pop_front() {
        for (dependent, deps) in map {
            if deps.contains(&current) && visited.insert(dependent.clone()) {
                queue.push_back(dependent.clone());
            }
        }
    }

    visited.remove(column);
    visited
}

/// Find a cycle, returned as the closed path `[a, b, ..., a]`.
///
/// Columns are visited in name order, so the reported cycle is stable.
pub fn has_circular_dependency(map: &DependencyMap) -> Option<Vec<String>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        column: &'a str,
        map: &'a DependencyMap,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(column) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|c| *c == column)?;
                let mut cycle: Vec<String> = path[start..].iter().map(|c| c.to_string()).collect();
                cycle.push(column.to_string());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(column, Mark::Visiting);
        path.push(column);
        if let Some(deps) = map.get(column) {
            for dep in deps {
                if let Some(cycle) = visit(dep, map, marks, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        marks.insert(column, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    map.keys()
        .find_map(|column| visit(column, map, &mut marks, &mut path))
}

/// Order the defined columns so every column comes after its dependencies.
///
/// Only keys of `map` are returned; referenced source columns are not.
/// Independent columns keep name order.
pub fn topological_sort(map: &DependencyMap) -> Result<Vec<String>> {
    if let Some(path) = has_circular_dependency(map) {
        return Err(PrismError::Cycle { path });
    }

    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
    for column in map.keys() {
        nodes.insert(column.as_str(), graph.add_node(column.as_str()));
    }
    for (column, deps) in map {
        for dep in deps.iter().filter(|d| *d != column) {
            if let Some(&from) = nodes.get(dep.as_str()) {
                graph.add_edge(from, nodes[column.as_str()], ());
            }
        }
    }

    // Kahn's algorithm with the ready set ordered by name.
    let mut indegree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| (idx, graph.neighbors_directed(idx, Direction::Incoming).count()))
        .collect();
    let mut ready: BTreeSet<(&str, NodeIndex)> = indegree
        .iter()
        .filter(|&(_, &count)| count == 0)
        .map(|(&idx, _)| (graph[idx], idx))
        .collect();
    let mut order = Vec::with_capacity(map.len());
    while let Some(next) = ready.pop_first() {
        let (name, idx) = next;
        order.push(name.to_string());
        for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
            if let Some(count) = indegree.get_mut(&dependent) {
                *count -= 1;
                if *count == 0 {
                    ready.insert((graph[dependent], dependent));
                }
            }
        }
    }

    if order.len() != map.len() {
        let path = map.keys().filter(|c| !order.contains(*c)).cloned().collect();
        return Err(PrismError::Cycle { path });
    }
    Ok(order)
}
