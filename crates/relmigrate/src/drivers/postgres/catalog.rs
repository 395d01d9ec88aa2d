//! Catalog introspection for PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use crate::catalog::link_inverse_relations;
use crate::core::{CatalogSource, FieldDescriptor, TableDescriptor};
use crate::error::Result;

use super::PostgresStore;

const TABLES_QUERY: &str = r#"
    SELECT table_name
    FROM information_schema.tables
    WHERE table_type = 'BASE TABLE'
      AND table_schema = $1
    ORDER BY table_name
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT table_name, column_name, data_type = 'USER-DEFINED' AS is_enum
    FROM information_schema.columns
    WHERE table_schema = $1
    ORDER BY table_name, ordinal_position
"#;

const PRIMARY_KEYS_QUERY: &str = r#"
    SELECT t.relname,
           array_agg(a.attname::text ORDER BY array_position(c.conkey, a.attnum))
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
    WHERE n.nspname = $1
      AND c.contype = 'p'
    GROUP BY t.relname
"#;

const FOREIGN_KEYS_QUERY: &str = r#"
    SELECT t.relname,
           c.conname::text,
           rt.relname,
           array_agg(a.attname::text ORDER BY array_position(c.conkey, a.attnum))
    FROM pg_catalog.pg_constraint c
    JOIN pg_catalog.pg_class t ON t.oid = c.conrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = t.relnamespace
    JOIN pg_catalog.pg_class rt ON rt.oid = c.confrelid
    JOIN pg_catalog.pg_namespace rn ON rn.oid = rt.relnamespace
    JOIN pg_catalog.pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(c.conkey)
    WHERE n.nspname = $1
      AND rn.nspname = $1
      AND c.contype = 'f'
    GROUP BY t.relname, c.conname, rt.relname
    ORDER BY t.relname, c.conname
"#;

#[async_trait]
impl CatalogSource for PostgresStore {
    async fn load_catalog(&self) -> Result<Vec<TableDescriptor>> {
        let client = self.client("introspecting catalog").await?;

        let mut tables: Vec<TableDescriptor> = client
            .query(TABLES_QUERY, &[&self.schema])
            .await?
            .iter()
            .map(|row| TableDescriptor::new(row.get::<_, String>(0), Vec::new()))
            .collect();
        let index: HashMap<String, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        for row in client.query(COLUMNS_QUERY, &[&self.schema]).await? {
            let table: String = row.get(0);
            let column: String = row.get(1);
            let is_enum: bool = row.get(2);
            if let Some(&i) = index.get(&table) {
                tables[i].fields.push(if is_enum {
                    FieldDescriptor::enumeration(column)
                } else {
                    FieldDescriptor::scalar(column)
                });
            }
        }

        // Only tables with a primary key constraint can be paged and merged.
        for table in tables.iter_mut() {
            table.single_column_key = false;
        }
        for row in client.query(PRIMARY_KEYS_QUERY, &[&self.schema]).await? {
            let table: String = row.get(0);
            let columns: Vec<String> = row.get(1);
            if let Some(&i) = index.get(&table) {
                apply_primary_key(&mut tables[i], columns);
            }
        }

        for row in client.query(FOREIGN_KEYS_QUERY, &[&self.schema]).await? {
            let table: String = row.get(0);
            let name: String = row.get(1);
            let related: String = row.get(2);
            let columns: Vec<String> = row.get(3);
            if let Some(&i) = index.get(&table) {
                tables[i]
                    .fields
                    .push(FieldDescriptor::relation(name, related, columns));
            }
        }

        link_inverse_relations(&mut tables);
        info!(
            "Introspected {} tables from PostgreSQL schema '{}'",
            tables.len(),
            self.schema
        );
        Ok(tables)
    }
}

fn apply_primary_key(table: &mut TableDescriptor, columns: Vec<String>) {
    table.single_column_key = columns.len() == 1;
    if let Some(first) = columns.into_iter().next() {
        table.primary_key = first;
    }
}
