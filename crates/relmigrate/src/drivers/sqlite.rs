//! SQLite store using `rusqlite`.
//!
//! The connection sits behind a `tokio::sync::Mutex` and every call runs in
//! `spawn_blocking`. `close` releases the connection and later calls fail.
//! SQLite has no timestamp type, so timestamps are stored as epoch
//! milliseconds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalog::link_inverse_relations;
use crate::core::{
    CatalogSource, FieldDescriptor, RelationalStore, Row, RowId, TableDescriptor, Value,
};
use crate::error::{MigrateError, Result};

/// SQLite implementation of [`RelationalStore`].
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`. `:memory:` opens a private
    /// in-memory database.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            Connection::open_in_memory()
        } else {
            Connection::open(&path)
        }
        .map_err(|e| MigrateError::driver("sqlite", format!("open {}: {}", path.display(), e)))?;

        // journal_mode answers with a row, so it cannot go through execute_batch.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))
            .and_then(|_| conn.execute_batch("PRAGMA foreign_keys=ON;"))
            .map_err(|e| MigrateError::driver("sqlite", format!("setting pragmas: {}", e)))?;

        info!("Opened SQLite database {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Database path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.blocking_lock();
            let conn = guard
                .as_mut()
                .ok_or_else(|| MigrateError::driver("sqlite", "database is closed"))?;
            f(conn).map_err(|e| MigrateError::driver("sqlite", e))
        })
        .await
        .map_err(|e| MigrateError::driver("sqlite", format!("task join error: {}", e)))?
    }

    async fn select(&self, sql: String, params: Vec<SqlValue>) -> Result<Vec<Row>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let header: Arc<[String]> = stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect();
            let width = header.len();
            let mut rows = stmt.query(rusqlite::params_from_iter(params))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let mut values = Vec::with_capacity(width);
                for idx in 0..width {
                    values.push(from_sql(row.get_ref(idx)?));
                }
                out.push(Row::new(header.clone(), values));
            }
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl RelationalStore for SqliteStore {
    fn engine(&self) -> &str {
        "sqlite"
    }

    async fn ping(&self) -> Result<()> {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |_| Ok(())))
            .await
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [&table],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
        })
        .await
    }

    async fn count(&self, table: &TableDescriptor) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&table.name));
        self.with_conn(move |conn| conn.query_row(&sql, [], |row| row.get(0)))
            .await
    }

    async fn find_page(
        &self,
        table: &TableDescriptor,
        page_size: usize,
        cursor: Option<&RowId>,
    ) -> Result<Vec<Row>> {
        let key = quote_ident(&table.primary_key);
        let mut params: Vec<SqlValue> = Vec::with_capacity(2);
        let mut sql = format!("SELECT * FROM {}", quote_ident(&table.name));
        if let Some(cursor) = cursor {
            sql.push_str(&format!(" WHERE {} > ?{}", key, params.len() + 1));
            params.push(match cursor {
                RowId::Int(v) => SqlValue::Integer(*v),
                RowId::Text(v) => SqlValue::Text(v.clone()),
            });
        }
        sql.push_str(&format!(" ORDER BY {} LIMIT ?{}", key, params.len() + 1));
        params.push(SqlValue::Integer(page_size as i64));
        self.select(sql, params).await
    }

    async fn find_all(&self, table: &TableDescriptor) -> Result<Vec<Row>> {
        let sql = format!(
            "SELECT * FROM {} ORDER BY {}",
            quote_ident(&table.name),
            quote_ident(&table.primary_key)
        );
        self.select(sql, Vec::new()).await
    }

    async fn bulk_insert(
        &self,
        table: &TableDescriptor,
        rows: &[Row],
        skip_existing: bool,
    ) -> Result<u64> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let columns: Vec<String> = first.columns().to_vec();
        let sql = insert_statement(&table.name, &table.primary_key, &columns, skip_existing);
        let values: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| to_sql(row.get(c).unwrap_or(&Value::Null)))
                    .collect()
            })
            .collect();
        let name = table.name.clone();

        let inserted = self
            .with_conn(move |conn| {
                let tx = conn.transaction()?;
                let mut inserted = 0u64;
                {
                    let mut stmt = tx.prepare(&sql)?;
                    for row in values {
                        inserted += stmt.execute(rusqlite::params_from_iter(row))? as u64;
                    }
                }
                tx.commit()?;
                Ok(inserted)
            })
            .await
            .map_err(|e| MigrateError::transfer(name, e.to_string()))?;

        debug!("{}: inserted {} of {} rows", table.name, inserted, rows.len());
        Ok(inserted)
    }

    async fn close(&self) {
        let Some(conn) = self.conn.lock().await.take() else {
            return;
        };
        debug!("Closing SQLite database {}", self.path.display());
        match tokio::task::spawn_blocking(move || conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err((_, e))) => warn!("Closing SQLite database {}: {}", self.path.display(), e),
            Err(e) => warn!("Closing SQLite database {}: {}", self.path.display(), e),
        }
    }
}

#[async_trait]
impl CatalogSource for SqliteStore {
    async fn load_catalog(&self) -> Result<Vec<TableDescriptor>> {
        let mut tables = self.with_conn(introspect).await?;
        link_inverse_relations(&mut tables);
        info!(
            "Introspected {} tables from SQLite database {}",
            tables.len(),
            self.path.display()
        );
        Ok(tables)
    }
}

/// Read table, column, key, and FK metadata.
fn introspect(conn: &mut Connection) -> rusqlite::Result<Vec<TableDescriptor>> {
    let names: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        names
    };

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let mut table = TableDescriptor::new(name.clone(), Vec::new());

        // (column, position in primary key; 0 when not part of it)
        let columns: Vec<(String, i64)> = {
            let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&name)))?;
            let columns = stmt
                .query_map([], |row| Ok((row.get(1)?, row.get(5)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            columns
        };
        let mut key: Vec<(i64, String)> = columns
            .iter()
            .filter(|(_, pk)| *pk > 0)
            .map(|(c, pk)| (*pk, c.clone()))
            .collect();
        key.sort();
        table.single_column_key = key.len() == 1;
        if let Some((_, first)) = key.into_iter().next() {
            table.primary_key = first;
        }
        table
            .fields
            .extend(columns.into_iter().map(|(c, _)| FieldDescriptor::scalar(c)));

        // (constraint id, referenced table, local column)
        let fks: Vec<(i64, String, String)> = {
            let mut stmt =
                conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(&name)))?;
            let fks = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(2)?, row.get(3)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            fks
        };
        let mut grouped: Vec<(i64, String, Vec<String>)> = Vec::new();
        for (id, related, column) in fks {
            match grouped.iter_mut().find(|(gid, _, _)| *gid == id) {
                Some((_, _, cols)) => cols.push(column),
                None => grouped.push((id, related, vec![column])),
            }
        }
        for (_, related, cols) in grouped {
            let field_name = format!("{}_{}_fkey", name, cols.join("_"));
            table
                .fields
                .push(FieldDescriptor::relation(field_name, related, cols));
        }

        tables.push(table);
    }
    Ok(tables)
}

fn insert_statement(table: &str, key: &str, columns: &[String], skip_existing: bool) -> String {
    let col_list: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        col_list.join(", "),
        placeholders.join(", ")
    );
    if skip_existing {
        sql.push_str(&format!(" ON CONFLICT({}) DO NOTHING", quote_ident(key)));
    }
    sql
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Timestamp(ts) => SqlValue::Integer(ts.timestamp_millis()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
        // Same text form PostgreSQL uses for bytea.
        ValueRef::Blob(b) => Value::Text(
            std::iter::once("\\x".to_string())
                .chain(b.iter().map(|byte| format!("{:02x}", byte)))
                .collect(),
        ),
    }
}
