//! In-process relational store.
//!
//! Rows live in ordered maps keyed by primary key, so pagination and
//! skip-existing inserts behave like a real store. Foreign keys can be
//! enforced per column, and failures can be injected, which makes this the
//! store the orchestrator tests run against.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::core::{
    CatalogSource, RelationalStore, Row, RowId, TableDescriptor, DEFAULT_PRIMARY_KEY,
};
use crate::error::{MigrateError, Result};

#[derive(Debug, Default)]
struct MemoryTable {
    rows: BTreeMap<RowId, Row>,
}

#[derive(Debug, Clone)]
struct ForeignKey {
    column: String,
    references: String,
}

#[derive(Debug, Default, Clone, Copy)]
struct CallCounts {
    find_page: usize,
    find_all: usize,
    bulk_insert: usize,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    foreign_keys: HashMap<String, Vec<ForeignKey>>,
    failing: HashSet<String>,
    calls: HashMap<String, CallCounts>,
}

/// Relational store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    catalog: Vec<TableDescriptor>,
    unreachable: AtomicBool,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table keyed by `id` with initial rows.
    pub fn with_table(self, name: impl Into<String>, rows: Vec<Row>) -> Self {
        self.with_keyed_table(name, DEFAULT_PRIMARY_KEY, rows)
    }

    /// Add a table keyed by `key_column` with initial rows.
    ///
    /// Rows without a usable key are dropped.
    pub fn with_keyed_table(
        self,
        name: impl Into<String>,
        key_column: &str,
        rows: Vec<Row>,
    ) -> Self {
        let name = name.into();
        {
            let mut state = self.lock();
            let table = state.tables.entry(name).or_default();
            for row in rows {
                if let Some(id) = row.id(key_column) {
                    table.rows.insert(id, row);
                }
            }
        }
        self
    }

    /// Enforce that non-NULL values in `table.column` exist as keys of
    /// `references`.
    pub fn with_foreign_key(
        self,
        table: impl Into<String>,
        column: impl Into<String>,
        references: impl Into<String>,
    ) -> Self {
        self.lock()
            .foreign_keys
            .entry(table.into())
            .or_default()
            .push(ForeignKey {
                column: column.into(),
                references: references.into(),
            });
        self
    }

    /// Descriptors returned when this store is used as a catalog source.
    pub fn with_catalog(mut self, tables: Vec<TableDescriptor>) -> Self {
        self.catalog = tables;
        self
    }

    /// Make every insert into `table` fail.
    pub fn fail_inserts(&self, table: impl Into<String>) {
        self.lock().failing.insert(table.into());
    }

    /// Make [`ping`](RelationalStore::ping) fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Whether [`close`](RelationalStore::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Rows of `table` in key order.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of rows in `table`.
    pub fn row_count(&self, table: &str) -> usize {
        self.lock().tables.get(table).map(|t| t.rows.len()).unwrap_or(0)
    }

    /// Number of `find_page` calls made for `table`.
    pub fn find_page_calls(&self, table: &str) -> usize {
        self.calls(table).find_page
    }

    /// Number of `find_all` calls made for `table`.
    pub fn find_all_calls(&self, table: &str) -> usize {
        self.calls(table).find_all
    }

    /// Number of `bulk_insert` calls made for `table`.
    pub fn bulk_insert_calls(&self, table: &str) -> usize {
        self.calls(table).bulk_insert
    }

    fn calls(&self, table: &str) -> CallCounts {
        self.lock().calls.get(table).copied().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn table(&self, name: &str) -> Result<&MemoryTable> {
        self.tables.get(name).ok_or_else(|| MigrateError::SchemaDrift {
            table: name.to_string(),
            side: "memory store".to_string(),
        })
    }

    fn count_call(&mut self, table: &str) -> &mut CallCounts {
        self.calls.entry(table.to_string()).or_default()
    }

    /// Check FK constraints of `row`, treating `pending` as already inserted.
    fn check_foreign_keys(&self, table: &str, row: &Row, pending: &HashSet<RowId>) -> Result<()> {
        let Some(fks) = self.foreign_keys.get(table) else {
            return Ok(());
        };
        for fk in fks {
            let Some(parent) = row.id(&fk.column) else {
                continue;
            };
            let exists = if fk.references == table {
                pending.contains(&parent)
                    || self
                        .tables
                        .get(table)
                        .map(|t| t.rows.contains_key(&parent))
                        .unwrap_or(false)
            } else {
                self.tables
                    .get(&fk.references)
                    .map(|t| t.rows.contains_key(&parent))
                    .unwrap_or(false)
            };
            if !exists {
                return Err(MigrateError::transfer(
                    table,
                    format!(
                        "foreign key violation: {} = {} has no row in {}",
                        fk.column, parent, fk.references
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalStore for MemoryStore {
    fn engine(&self) -> &str {
        "memory"
    }

    async fn ping(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(MigrateError::driver("memory", "store is unreachable"));
        }
        Ok(())
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        Ok(self.lock().tables.contains_key(table))
    }

    async fn count(&self, table: &TableDescriptor) -> Result<i64> {
        let state = self.lock();
        Ok(state.table(&table.name)?.rows.len() as i64)
    }

    async fn find_page(
        &self,
        table: &TableDescriptor,
        page_size: usize,
        cursor: Option<&RowId>,
    ) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.count_call(&table.name).find_page += 1;
        let rows = &state.table(&table.name)?.rows;
        let lower = match cursor {
            Some(id) => Bound::Excluded(id.clone()),
            None => Bound::Unbounded,
        };
        Ok(rows
            .range((lower, Bound::Unbounded))
            .take(page_size)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn find_all(&self, table: &TableDescriptor) -> Result<Vec<Row>> {
        let mut state = self.lock();
        state.count_call(&table.name).find_all += 1;
        Ok(state.table(&table.name)?.rows.values().cloned().collect())
    }

    async fn bulk_insert(
        &self,
        table: &TableDescriptor,
        rows: &[Row],
        skip_existing: bool,
    ) -> Result<u64> {
        let mut state = self.lock();
        state.count_call(&table.name).bulk_insert += 1;

        if state.failing.contains(&table.name) {
            return Err(MigrateError::transfer(&table.name, "injected insert failure"));
        }

        // Validate the whole chunk first so the insert is all-or-nothing.
        let existing = &state.table(&table.name)?.rows;
        let mut pending: Vec<(RowId, &Row)> = Vec::with_capacity(rows.len());
        let mut pending_ids: HashSet<RowId> = HashSet::with_capacity(rows.len());
        for row in rows {
            let id = row.id(&table.primary_key).ok_or_else(|| {
                MigrateError::transfer(
                    &table.name,
                    format!("row has no usable value for key {}", table.primary_key),
                )
            })?;
            if existing.contains_key(&id) || pending_ids.contains(&id) {
                if skip_existing {
                    continue;
                }
                return Err(MigrateError::transfer(
                    &table.name,
                    format!("duplicate key {} = {}", table.primary_key, id),
                ));
            }
            state.check_foreign_keys(&table.name, row, &pending_ids)?;
            pending_ids.insert(id.clone());
            pending.push((id, row));
        }

        let inserted = pending.len() as u64;
        let owned: Vec<(RowId, Row)> = pending
            .into_iter()
            .map(|(id, row)| (id, row.clone()))
            .collect();
        if let Some(target) = state.tables.get_mut(&table.name) {
            target.rows.extend(owned);
        }
        debug!("{}: inserted {} of {} rows", table.name, inserted, rows.len());
        Ok(inserted)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogSource for MemoryStore {
    async fn load_catalog(&self) -> Result<Vec<TableDescriptor>> {
        Ok(self.catalog.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FieldDescriptor, Value};

    fn user(id: i64) -> Row {
        Row::from_pairs([("id", Value::Int(id)), ("name", Value::from(format!("u{}", id)))])
    }

    fn post(id: i64, author: i64) -> Row {
        Row::from_pairs([("id", Value::Int(id)), ("authorId", Value::Int(author))])
    }

    fn descriptor(name: &str) -> TableDescriptor {
        TableDescriptor::new(name, vec![FieldDescriptor::scalar("id")])
    }

    #[tokio::test]
    async fn test_find_page_uses_cursor() {
        let store = MemoryStore::new().with_table("User", (1..=5).map(user).collect());
        let table = descriptor("User");

        let first = store.find_page(&table, 2, None).await.unwrap();
        assert_eq!(first.len(), 2);
        let cursor = first[1].id("id").unwrap();
        let second = store.find_page(&table, 2, Some(&cursor)).await.unwrap();
        assert_eq!(second[0].id("id"), Some(RowId::Int(3)));
        assert_eq!(store.find_page_calls("User"), 2);
    }

    #[tokio::test]
    async fn test_bulk_insert_skips_existing() {
        let store = MemoryStore::new().with_table("User", vec![user(1)]);
        let table = descriptor("User");

        let inserted = store
            .bulk_insert(&table, &[user(1), user(2)], true)
            .await
            .unwrap();
        assert_eq!(inserted, 1);
        assert_eq!(store.row_count("User"), 2);
        assert!(store.bulk_insert(&table, &[user(2)], false).await.is_err());
    }

    #[tokio::test]
    async fn test_foreign_key_enforced_atomically() {
        let store = MemoryStore::new()
            .with_table("User", vec![user(1)])
            .with_table("Post", vec![])
            .with_foreign_key("Post", "authorId", "User");
        let table = descriptor("Post");

        let err = store
            .bulk_insert(&table, &[post(1, 1), post(2, 9)], true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("foreign key"));
        assert_eq!(store.row_count("Post"), 0);
    }

    #[tokio::test]
    async fn test_self_reference_within_chunk() {
        let store = MemoryStore::new()
            .with_table("Task", vec![])
            .with_foreign_key("Task", "parentId", "Task");
        let table = descriptor("Task");
        let task = |id: i64, parent: Option<i64>| {
            Row::from_pairs([("id", Value::Int(id)), ("parentId", Value::from(parent))])
        };

        let ok = store
            .bulk_insert(&table, &[task(1, None), task(2, Some(1))], true)
            .await
            .unwrap();
        assert_eq!(ok, 2);
        assert!(store.bulk_insert(&table, &[task(3, Some(4))], true).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_and_close() {
        let store = MemoryStore::new();
        store.set_unreachable(true);
        assert!(store.ping().await.is_err());
        store.close().await;
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_missing_table_is_drift() {
        let store = MemoryStore::new();
        assert!(!store.has_table("Ghost").await.unwrap());
        assert!(matches!(
            store.count(&descriptor("Ghost")).await,
            Err(MigrateError::SchemaDrift { .. })
        ));
    }
}
