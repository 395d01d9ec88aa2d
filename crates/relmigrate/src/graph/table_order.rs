//! Insertion order for tables (Kahn's algorithm with catalog-order fallback).

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::core::TableDescriptor;

use super::dependency::DependencyGraph;

/// Resolved table insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TableOrder {
    /// Every catalog table exactly once.
    pub tables: Vec<String>,

    /// Tables that could not be ordered because they sit on (or behind) a
    /// cycle. They are the tail of `tables`, in catalog order.
    pub cyclic: Vec<String>,
}

impl TableOrder {
    /// Whether a cycle forced the fallback.
    pub fn has_cycle(&self) -> bool {
        !self.cyclic.is_empty()
    }

    /// Whether `table` was placed by the cycle fallback.
    pub fn is_cyclic(&self, table: &str) -> bool {
        self.cyclic.iter().any(|t| t == table)
    }

    /// Position of `table` in the order.
    pub fn position(&self, table: &str) -> Option<usize> {
        self.tables.iter().position(|t| t == table)
    }
}

/// Sort tables so that every table comes after the tables it depends on.
///
/// Ties between tables that become ready at the same time are broken by
/// catalog order. If a cycle remains, the unresolved tables are appended in
/// catalog order and reported in [`TableOrder::cyclic`].
pub fn sort_tables(tables: &[TableDescriptor], graph: &DependencyGraph) -> TableOrder {
    let index: HashMap<&str, usize> = tables
        .iter()
        .enumerate()
        .map(|(i, t)| (t.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; tables.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];

    for (i, table) in tables.iter().enumerate() {
        for dep in graph.dependencies_of(&table.name) {
            if let Some(&j) = index.get(dep) {
                in_degree[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..tables.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut placed = vec![false; tables.len()];
    let mut order = Vec::with_capacity(tables.len());

    while let Some(i) = queue.pop_front() {
        placed[i] = true;
        order.push(tables[i].name.clone());
        for &child in &dependents[i] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    let cyclic: Vec<String> = tables
        .iter()
        .enumerate()
        .filter(|(i, _)| !placed[*i])
        .map(|(_, t)| t.name.clone())
        .collect();
    order.extend(cyclic.iter().cloned());

    TableOrder {
        tables: order,
        cyclic,
    }
}
