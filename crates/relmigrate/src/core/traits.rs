//! Core traits for store-agnostic data migration.
//!
//! - [`RelationalStore`]: the capability the engine needs from both sides
//! - [`CatalogSource`]: where table/relationship metadata comes from
//!
//! The engine only ever talks to these traits, so any store that can count,
//! page, and bulk insert by primary key can take part in a migration.

use async_trait::async_trait;

use crate::error::Result;

use super::schema::TableDescriptor;
use super::value::{Row, RowId};

/// Read and write rows of a relational store.
///
/// Implementations own their connection (or pool) for the lifetime of the
/// run and release it in [`close`](RelationalStore::close).
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Engine identifier (e.g., "postgres", "sqlite").
    fn engine(&self) -> &str;

    /// Trivial liveness probe.
    async fn ping(&self) -> Result<()>;

    /// Whether the store has an accessor (a table) for this name.
    async fn has_table(&self, table: &str) -> Result<bool>;

    /// Count the rows of a table.
    async fn count(&self, table: &TableDescriptor) -> Result<i64>;

    /// Fetch up to `page_size` rows ordered by primary key ascending,
    /// starting strictly after `cursor` when given.
    async fn find_page(
        &self,
        table: &TableDescriptor,
        page_size: usize,
        cursor: Option<&RowId>,
    ) -> Result<Vec<Row>>;

    /// Fetch every row of a table ordered by primary key.
    ///
    /// Only used for self-referential tables, which are expected to fit
    /// in memory.
    async fn find_all(&self, table: &TableDescriptor) -> Result<Vec<Row>>;

    /// Insert rows in one atomic statement or transaction.
    ///
    /// With `skip_existing`, rows whose primary key is already present are
    /// silently left alone. Returns the number of rows actually inserted.
    async fn bulk_insert(
        &self,
        table: &TableDescriptor,
        rows: &[Row],
        skip_existing: bool,
    ) -> Result<u64>;

    /// Release the connection or pool.
    async fn close(&self);
}

/// Supply table descriptors for a run.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Load descriptors in catalog order.
    async fn load_catalog(&self) -> Result<Vec<TableDescriptor>>;
}
