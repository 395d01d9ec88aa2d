//! Table-level dependency graph derived from catalog metadata.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::core::TableDescriptor;

/// Mapping from table name to the set of tables it depends on.
///
/// An edge `A -> B` means rows of `A` may reference rows of `B` through a
/// foreign key stored on `A`. Self-dependencies are never recorded; they are
/// resolved at row level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    edges: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build the graph for one run's catalog.
    ///
    /// A relation adds an edge only if it owns FK columns and points at
    /// another table that is part of this catalog. Malformed metadata yields
    /// fewer edges; it never fails.
    pub fn build(tables: &[TableDescriptor]) -> Self {
        let known: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
        let mut edges: HashMap<String, BTreeSet<String>> = HashMap::with_capacity(tables.len());

        for table in tables {
            let deps = edges.entry(table.name.clone()).or_default();
            for field in table.fields.iter().filter(|f| f.is_owning_relation()) {
                let Some(related) = field.related_table.as_deref() else {
                    continue;
                };
                if related == table.name {
                    continue;
                }
                if !known.contains(related) {
                    debug!(
                        "{}: ignoring relation {} to table {} outside the catalog",
                        table.name, field.name, related
                    );
                    continue;
                }
                deps.insert(related.to_string());
            }
        }

        Self { edges }
    }

    /// Tables that `table` depends on.
    pub fn dependencies_of(&self, table: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(table)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Whether `table` depends on `other`.
    pub fn depends_on(&self, table: &str, other: &str) -> bool {
        self.edges
            .get(table)
            .map(|deps| deps.contains(other))
            .unwrap_or(false)
    }

    /// Number of dependencies of `table` (its in-degree for ordering).
    pub fn dependency_count(&self, table: &str) -> usize {
        self.edges.get(table).map(BTreeSet::len).unwrap_or(0)
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }
}
