//! Schema catalog: the table and relationship metadata a run works from.
//!
//! A catalog comes either from a file (YAML or JSON, chosen by extension) or
//! from introspecting the source store. Either way it is loaded once and then
//! only read.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{CatalogSource, FieldDescriptor, TableDescriptor};
use crate::error::{MigrateError, Result};

/// Ordered list of table descriptors for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaCatalog {
    /// Tables in catalog order.
    pub tables: Vec<TableDescriptor>,
}

impl SchemaCatalog {
    /// Wrap an already-built list of descriptors.
    pub fn new(tables: Vec<TableDescriptor>) -> Self {
        Self { tables }
    }

    /// Load a catalog file. `.json` files are parsed as JSON, anything else
    /// as YAML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let catalog: SchemaCatalog = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        catalog.check()?;
        info!(
            "Loaded catalog with {} tables from {}",
            catalog.tables.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Table names must be unique.
    fn check(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(MigrateError::Catalog("table with empty name".into()));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(MigrateError::Catalog(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
        }
        Ok(())
    }

    /// Keep tables matching any `include` pattern (all when empty) and no
    /// `exclude` pattern. Catalog order is preserved.
    pub fn filter(self, include: &[String], exclude: &[String]) -> Result<Self> {
        let include = compile_patterns(include)?;
        let exclude = compile_patterns(exclude)?;

        let tables = self
            .tables
            .into_iter()
            .filter(|t| {
                let included = include.is_empty() || include.iter().any(|p| p.matches(&t.name));
                let excluded = exclude.iter().any(|p| p.matches(&t.name));
                if !included || excluded {
                    debug!("{}: filtered out of the catalog", t.name);
                }
                included && !excluded
            })
            .collect();

        Ok(Self { tables })
    }

    /// Look up a table by name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Consume the catalog.
    pub fn into_tables(self) -> Vec<TableDescriptor> {
        self.tables
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| MigrateError::Config(format!("invalid table pattern '{}': {}", p, e)))
        })
        .collect()
}

/// Add the inverse side of every owning relation to the referenced table.
///
/// Introspection only sees FK constraints on the owning table; the inverse
/// field mirrors what a model catalog would declare. Inverse fields carry no
/// FK columns so they never create dependency edges.
pub fn link_inverse_relations(tables: &mut [TableDescriptor]) {
    let mut inverse: Vec<(String, FieldDescriptor)> = Vec::new();
    for table in tables.iter() {
        for field in table.fields.iter().filter(|f| f.is_owning_relation()) {
            if let Some(related) = &field.related_table {
                inverse.push((
                    related.clone(),
                    FieldDescriptor::inverse_relation(
                        format!("{}_{}", table.name, field.name),
                        table.name.clone(),
                    ),
                ));
            }
        }
    }

    for (target, field) in inverse {
        if let Some(table) = tables.iter_mut().find(|t| t.name == target) {
            table.fields.push(field);
        }
    }
}

/// Catalog source backed by a file.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    /// Create a source for the given catalog file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CatalogSource for FileCatalog {
    async fn load_catalog(&self) -> Result<Vec<TableDescriptor>> {
        Ok(SchemaCatalog::from_file(&self.path)?.into_tables())
    }
}
