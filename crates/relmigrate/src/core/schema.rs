//! Table and field metadata consumed by the resolvers and the transfer engine.
//!
//! Descriptors are produced once per run (from a catalog file or by
//! introspecting the source store) and are never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Default primary key column when a catalog entry does not name one.
pub const DEFAULT_PRIMARY_KEY: &str = "id";

/// Kind of a model field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Plain column.
    Scalar,
    /// Link to another table. Only the owning side stores FK columns.
    Relation,
    /// Column restricted to an enumerated set of values.
    Enum,
    /// Column whose type the catalog cannot describe.
    Unsupported,
}

/// Field metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name (column name for non-relation fields).
    pub name: String,

    /// Field kind.
    pub kind: FieldKind,

    /// Referenced table (relation fields only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_table: Option<String>,

    /// Columns on this table that physically store the foreign key.
    ///
    /// Empty for inverse/virtual relations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub own_fk_columns: Vec<String>,
}

impl FieldDescriptor {
    /// A scalar column.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Scalar,
            related_table: None,
            own_fk_columns: Vec::new(),
        }
    }

    /// An enum column.
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self {
            kind: FieldKind::Enum,
            ..Self::scalar(name)
        }
    }

    /// The owning side of a relation: `fk_columns` live on this table.
    pub fn relation<S: Into<String>>(
        name: impl Into<String>,
        related_table: impl Into<String>,
        fk_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Relation,
            related_table: Some(related_table.into()),
            own_fk_columns: fk_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// The inverse side of a relation; the FK lives on the other table.
    pub fn inverse_relation(name: impl Into<String>, related_table: impl Into<String>) -> Self {
        Self::relation(name, related_table, Vec::<String>::new())
    }

    /// Whether this field stores a foreign key on its own table.
    pub fn is_owning_relation(&self) -> bool {
        self.kind == FieldKind::Relation && !self.own_fk_columns.is_empty()
    }

    /// Whether this field is backed by a physical column of its own.
    pub fn is_column(&self) -> bool {
        self.kind != FieldKind::Relation
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name (unique within a catalog).
    pub name: String,

    /// Primary key column used for cursors and skip-existing inserts.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,

    /// Whether the primary key is a single column.
    #[serde(default = "default_true")]
    pub single_column_key: bool,

    /// Field definitions in catalog order.
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl TableDescriptor {
    /// Create a descriptor with the default `id` primary key.
    pub fn new(name: impl Into<String>, fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: name.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            single_column_key: true,
            fields,
        }
    }

    /// Override the primary key column.
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Physical column names (relation fields excluded).
    pub fn column_names(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is_column())
            .map(|f| f.name.as_str())
            .collect()
    }

    /// FK columns that reference this same table, in field order.
    ///
    /// More than one entry means automatic row ordering is ambiguous.
    pub fn self_reference_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.is_owning_relation())
            .filter(|f| f.related_table.as_deref() == Some(self.name.as_str()))
            .flat_map(|f| f.own_fk_columns.iter().map(String::as_str))
            .collect()
    }
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_table() -> TableDescriptor {
        TableDescriptor::new(
            "Task",
            vec![
                FieldDescriptor::scalar("id"),
                FieldDescriptor::scalar("title"),
                FieldDescriptor::scalar("parentId"),
                FieldDescriptor::relation("parent", "Task", ["parentId"]),
                FieldDescriptor::inverse_relation("children", "Task"),
                FieldDescriptor::relation("owner", "User", ["ownerId"]),
            ],
        )
    }

    #[test]
    fn test_owning_relation_requires_fk_columns() {
        assert!(FieldDescriptor::relation("parent", "Task", ["parentId"]).is_owning_relation());
        assert!(!FieldDescriptor::inverse_relation("children", "Task").is_owning_relation());
        assert!(!FieldDescriptor::scalar("id").is_owning_relation());
    }

    #[test]
    fn test_self_reference_columns_ignore_inverse_side() {
        let table = task_table();
        assert_eq!(table.self_reference_columns(), vec!["parentId"]);
    }

    #[test]
    fn test_column_names_skip_relations() {
        let table = task_table();
        assert_eq!(table.column_names(), vec!["id", "title", "parentId"]);
    }

    #[test]
    fn test_descriptor_from_yaml_uses_defaults() {
        let yaml = r#"
name: Role
fields:
  - name: id
    kind: scalar
  - name: users
    kind: relation
    related_table: User
"#;
        let table: TableDescriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(table.primary_key, "id");
        assert!(table.single_column_key);
        assert!(table.fields[1].own_fk_columns.is_empty());
        assert_eq!(table.fields[1].kind, FieldKind::Relation);
    }
}
