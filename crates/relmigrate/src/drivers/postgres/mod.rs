//! PostgreSQL store.
//!
//! Uses deadpool-postgres for connection pooling. Reads go through plain
//! keyset queries; writes are staged with text COPY into a transaction-scoped
//! temp table and merged with `ON CONFLICT DO NOTHING`.

mod catalog;
mod reader;
mod writer;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio::sync::Mutex;
use tokio_postgres::Config as PgConfig;
use tracing::{debug, info, warn};

use crate::config::PostgresConfig;
use crate::core::{RelationalStore, Row, RowId, TableDescriptor};
use crate::drivers::common::{SslMode, TlsBuilder};
use crate::error::{MigrateError, Result};

use reader::PgColumn;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// PostgreSQL implementation of [`RelationalStore`].
pub struct PostgresStore {
    pool: Pool,
    schema: String,
    location: String,
    shapes: Mutex<HashMap<String, Arc<Vec<PgColumn>>>>,
}

impl PostgresStore {
    /// Build the pool. No connection is opened until first use.
    pub fn connect(config: &PostgresConfig) -> Result<Self> {
        let mut pg_config = PgConfig::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.dbname(&config.database);
        pg_config.user(&config.user);
        pg_config.password(&config.password);

        // Connection options for reliability
        pg_config.keepalives(true);
        pg_config.keepalives_idle(Duration::from_secs(30));
        pg_config.connect_timeout(POOL_CONNECTION_TIMEOUT);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };

        let ssl_mode = SslMode::parse(&config.ssl_mode)?;
        let pool = match TlsBuilder::new(ssl_mode).build()? {
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let mgr = Manager::from_config(pg_config, tokio_postgres::NoTls, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?
            }
            Some(tls_connector) => {
                let mgr = Manager::from_config(pg_config, tls_connector, mgr_config);
                Pool::builder(mgr)
                    .max_size(config.max_connections)
                    .build()
                    .map_err(|e| MigrateError::pool(e, "creating PostgreSQL pool"))?
            }
        };

        let location = format!("{}:{}/{}", config.host, config.port, config.database);
        info!("PostgreSQL pool ready for {}", location);

        Ok(Self {
            pool,
            schema: config.schema.clone(),
            location,
            shapes: Mutex::new(HashMap::new()),
        })
    }

    async fn client(&self, context: &str) -> Result<Object> {
        self.pool
            .get()
            .await
            .map_err(|e| MigrateError::pool(e, format!("{} ({})", context, self.location)))
    }

    fn qualify(&self, table: &str) -> String {
        qualify_table(&self.schema, table)
    }

    /// Column names and types of `table`, cached for the run.
    async fn shape(&self, table: &str) -> Result<Arc<Vec<PgColumn>>> {
        let mut shapes = self.shapes.lock().await;
        if let Some(shape) = shapes.get(table) {
            return Ok(shape.clone());
        }
        let client = self.client("loading table shape").await?;
        let shape = Arc::new(reader::load_shape(&client, &self.qualify(table)).await?);
        debug!("{}: {} columns", table, shape.len());
        shapes.insert(table.to_string(), shape.clone());
        Ok(shape)
    }
}

#[async_trait]
impl RelationalStore for PostgresStore {
    fn engine(&self) -> &str {
        "postgres"
    }

    async fn ping(&self) -> Result<()> {
        let client = self.client("ping").await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }

    async fn has_table(&self, table: &str) -> Result<bool> {
        let client = self.client("checking table").await?;
        let row = client
            .query_one(
                "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
                 WHERE table_schema = $1 AND table_name = $2)",
                &[&self.schema, &table],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn count(&self, table: &TableDescriptor) -> Result<i64> {
        let client = self.client("counting rows").await?;
        let sql = format!("SELECT COUNT(*) FROM {}", self.qualify(&table.name));
        let row = client.query_one(&sql, &[]).await?;
        Ok(row.get(0))
    }

    async fn find_page(
        &self,
        table: &TableDescriptor,
        page_size: usize,
        cursor: Option<&RowId>,
    ) -> Result<Vec<Row>> {
        let shape = self.shape(&table.name).await?;
        let sql = reader::page_query(
            &self.qualify(&table.name),
            &shape,
            &table.primary_key,
            cursor,
            Some(page_size),
        );
        let client = self.client("reading page").await?;
        reader::fetch(&client, &sql, &shape).await
    }

    async fn find_all(&self, table: &TableDescriptor) -> Result<Vec<Row>> {
        let shape = self.shape(&table.name).await?;
        let sql = reader::page_query(
            &self.qualify(&table.name),
            &shape,
            &table.primary_key,
            None,
            None,
        );
        let client = self.client("reading table").await?;
        reader::fetch(&client, &sql, &shape).await
    }

    async fn bulk_insert(
        &self,
        table: &TableDescriptor,
        rows: &[Row],
        skip_existing: bool,
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let shape = self.shape(&table.name).await?;
        let mut client = self.client("writing chunk").await?;
        writer::insert_chunk(
            &mut client,
            &self.qualify(&table.name),
            &table.primary_key,
            &shape,
            rows,
            skip_existing,
        )
        .await
    }

    async fn close(&self) {
        self.pool.close();
    }
}

/// Quote a PostgreSQL identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with schema.
fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}
