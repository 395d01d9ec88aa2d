//! SQLite to SQLite runs over real database files.

#![cfg(feature = "sqlite")]

use std::path::Path;
use std::sync::Arc;

use relmigrate::{
    Config, MigrationConfig, Orchestrator, SqliteConfig, SqliteStore, StoreConfig, TableStatus,
    TransferMode,
};
use tokio_util::sync::CancellationToken;

const SCHEMA: &str = r#"
    CREATE TABLE "Category" (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        parentId INTEGER REFERENCES "Category"(id)
    );
    CREATE TABLE "Product" (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        price REAL,
        active BOOLEAN,
        categoryId INTEGER NOT NULL REFERENCES "Category"(id)
    );
"#;

fn create(path: &Path, data: &str) {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(data).unwrap();
}

fn seed(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let source = dir.join("source.db");
    let destination = dir.join("destination.db");
    // Children are stored with lower ids than their parents.
    create(
        &source,
        r#"
        INSERT INTO "Category" VALUES (1, 'laptops', 3), (2, 'phones', 3), (3, 'electronics', NULL);
        INSERT INTO "Product" VALUES
            (10, 'tablet', 199.5, 1, 2),
            (11, 'notebook', 899.0, 0, 1),
            (12, 'charger', NULL, NULL, 3);
        "#,
    );
    create(&destination, "");
    (source, destination)
}

fn config(source: &Path, destination: &Path, batch_size: usize) -> Config {
    Config {
        source: StoreConfig::Sqlite(SqliteConfig {
            path: source.to_path_buf(),
        }),
        destination: StoreConfig::Sqlite(SqliteConfig {
            path: destination.to_path_buf(),
        }),
        migration: MigrationConfig {
            batch_size,
            ..MigrationConfig::default()
        },
    }
}

fn rows(db: &Path, sql: &str) -> Vec<(i64, Option<String>)> {
    let conn = rusqlite::Connection::open(db).unwrap();
    let mut stmt = conn.prepare(sql).unwrap();
    let rows = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap();
    rows
}

#[tokio::test]
async fn test_sqlite_migration_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (source, destination) = seed(dir.path());
    let orch = Orchestrator::new(config(&source, &destination, 1)).unwrap();

    let report = orch.migrate(&CancellationToken::new()).await.unwrap();

    assert!(report.success, "{:?}", report);
    assert_eq!(report.table_order, vec!["Category", "Product"]);
    let category = &report.tables[0];
    assert_eq!(category.mode, Some(TransferMode::PreOrdered));
    assert_eq!(category.inserted, 3);

    assert_eq!(
        rows(&destination, r#"SELECT id, name FROM "Category" ORDER BY id"#),
        vec![
            (1, Some("laptops".to_string())),
            (2, Some("phones".to_string())),
            (3, Some("electronics".to_string())),
        ]
    );
    assert_eq!(
        rows(&destination, r#"SELECT id, CAST(price AS TEXT) FROM "Product" ORDER BY id"#),
        vec![
            (10, Some("199.5".to_string())),
            (11, Some("899.0".to_string())),
            (12, None),
        ]
    );
}

#[tokio::test]
async fn test_sqlite_partial_destination_is_completed() {
    let dir = tempfile::tempdir().unwrap();
    let (source, destination) = seed(dir.path());
    {
        let conn = rusqlite::Connection::open(&destination).unwrap();
        conn.execute_batch(
            r#"INSERT INTO "Category" VALUES (3, 'electronics', NULL), (1, 'laptops', 3);"#,
        )
        .unwrap();
    }
    let orch = Orchestrator::new(config(&source, &destination, 500)).unwrap();

    let report = orch.migrate(&CancellationToken::new()).await.unwrap();

    let category = &report.tables[0];
    assert_eq!(category.status, TableStatus::Completed);
    assert_eq!(category.inserted, 1);
    assert_eq!(category.skipped_existing, 2);
    assert_eq!(report.rows_inserted(), 4);
}

#[tokio::test]
async fn test_sqlite_stores_through_with_stores() {
    let dir = tempfile::tempdir().unwrap();
    let (source, destination) = seed(dir.path());
    let source = Arc::new(SqliteStore::open(source).unwrap());
    let destination = Arc::new(SqliteStore::open(destination).unwrap());
    let orch = Orchestrator::with_stores(
        source.clone(),
        destination.clone(),
        source.clone(),
        MigrationConfig::default(),
    );

    let tables = orch.load_catalog().await.unwrap();
    let plan = orch.plan(&tables).await.unwrap();
    assert_eq!(plan.tables[0].parent_column.as_deref(), Some("parentId"));
    assert_eq!(plan.tables[1].mode, Some(TransferMode::Paginated));

    let counts = orch.validate(&tables).await.unwrap();
    assert_eq!(counts[1].source_rows, Some(3));
    assert_eq!(counts[1].destination_rows, Some(0));
    orch.close().await;
}
