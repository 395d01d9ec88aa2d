//! Orchestrator runs against in-memory stores.

use std::sync::Arc;

use relmigrate::error::{EXIT_CANCELLED, EXIT_SUCCESS, EXIT_TRANSFER_ERROR};
use relmigrate::{
    FieldDescriptor, MemoryStore, MigrateError, MigrationConfig, Orchestrator, Row,
    TableDescriptor, TableStatus, TransferMode, Value,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn user(id: i64) -> Row {
    Row::from_pairs([("id", Value::Int(id)), ("name", Value::from(format!("u{}", id)))])
}

fn post(id: i64, author: i64) -> Row {
    Row::from_pairs([("id", Value::Int(id)), ("authorId", Value::Int(author))])
}

fn task(id: i64, parent: Option<i64>) -> Row {
    Row::from_pairs([("id", Value::Int(id)), ("parentId", Value::from(parent))])
}

/// Catalog order deliberately lists the dependent table first.
fn blog_catalog() -> Vec<TableDescriptor> {
    vec![
        TableDescriptor::new(
            "Post",
            vec![
                FieldDescriptor::scalar("id"),
                FieldDescriptor::scalar("authorId"),
                FieldDescriptor::relation("author", "User", vec!["authorId".to_string()]),
            ],
        ),
        TableDescriptor::new(
            "User",
            vec![
                FieldDescriptor::scalar("id"),
                FieldDescriptor::scalar("name"),
                FieldDescriptor::inverse_relation("posts", "Post"),
            ],
        ),
        TableDescriptor::new("Role", vec![FieldDescriptor::scalar("id")]),
    ]
}

fn blog_source() -> MemoryStore {
    MemoryStore::new()
        .with_table("User", (1..=3).map(user).collect())
        .with_table("Post", vec![post(1, 3), post(2, 1), post(3, 3)])
        .with_table("Role", vec![Row::from_pairs([("id", Value::Int(1))])])
        .with_catalog(blog_catalog())
}

fn blog_destination() -> MemoryStore {
    MemoryStore::new()
        .with_table("User", vec![])
        .with_table("Post", vec![])
        .with_table("Role", vec![])
        .with_foreign_key("Post", "authorId", "User")
}

fn orchestrator(
    source: &Arc<MemoryStore>,
    destination: &Arc<MemoryStore>,
    batch_size: usize,
) -> Orchestrator {
    Orchestrator::with_stores(
        source.clone(),
        destination.clone(),
        source.clone(),
        MigrationConfig {
            batch_size,
            ..MigrationConfig::default()
        },
    )
}

#[tokio::test]
async fn test_dependencies_are_inserted_first() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    let orch = orchestrator(&source, &destination, 2);

    let tables = orch.load_catalog().await.unwrap();
    let report = orch.run(&tables, &CancellationToken::new()).await.unwrap();

    assert!(report.success);
    assert_eq!(report.exit_code(), EXIT_SUCCESS);
    assert_eq!(report.table_order.last().map(String::as_str), Some("Post"));
    assert_eq!(destination.row_count("User"), 3);
    assert_eq!(destination.row_count("Post"), 3);
    assert_eq!(destination.row_count("Role"), 1);
    assert_eq!(report.rows_inserted(), 7);
}

#[tokio::test]
async fn test_rerun_inserts_nothing() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    let orch = orchestrator(&source, &destination, 500);
    let tables = orch.load_catalog().await.unwrap();

    orch.run(&tables, &CancellationToken::new()).await.unwrap();
    let second = orch.run(&tables, &CancellationToken::new()).await.unwrap();

    assert!(second.success);
    assert_eq!(second.rows_inserted(), 0);
    assert_eq!(second.rows_skipped(), 7);
    assert_eq!(destination.row_count("Post"), 3);
}

#[tokio::test]
async fn test_unreachable_destination_fails_before_any_write() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    destination.set_unreachable(true);
    let orch = orchestrator(&source, &destination, 500);

    let err = orch
        .run(&blog_catalog(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MigrateError::DestinationUnreachable(_)));
    assert_eq!(source.find_page_calls("User"), 0);
    assert_eq!(destination.bulk_insert_calls("User"), 0);
}

#[tokio::test]
async fn test_zero_batch_size_fails_before_any_read() {
    let source = Arc::new(
        blog_source()
            .with_table("Task", vec![task(1, None), task(2, Some(1))])
            .with_catalog(vec![task_table()]),
    );
    let destination = Arc::new(blog_destination().with_table("Task", vec![]));
    let orch = orchestrator(&source, &destination, 0);

    // Paginated tables.
    let err = orch
        .run(&blog_catalog(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Config(_)));

    // Pre-ordered self-referencing table.
    let err = orch
        .run(&[task_table()], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrateError::Config(_)));

    assert_eq!(source.find_page_calls("User"), 0);
    assert_eq!(source.find_all_calls("Task"), 0);
    assert_eq!(destination.row_count("User"), 0);
    assert_eq!(destination.row_count("Task"), 0);
}

#[tokio::test]
async fn test_missing_destination_table_is_skipped() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(
        MemoryStore::new()
            .with_table("User", vec![])
            .with_table("Post", vec![]),
    );
    let orch = orchestrator(&source, &destination, 500);

    let report = orch
        .run(&blog_catalog(), &CancellationToken::new())
        .await
        .unwrap();

    let role = report.tables.iter().find(|t| t.table == "Role").unwrap();
    assert_eq!(role.status, TableStatus::Skipped);
    assert!(role.warnings[0].contains("destination"));
    assert!(report.success);
    assert_eq!(destination.row_count("Post"), 3);
}

#[tokio::test]
async fn test_write_failure_fails_only_that_table() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    destination.fail_inserts("Role");
    let orch = orchestrator(&source, &destination, 500);

    let report = orch
        .run(&blog_catalog(), &CancellationToken::new())
        .await
        .unwrap();

    let role = report.tables.iter().find(|t| t.table == "Role").unwrap();
    assert_eq!(role.status, TableStatus::Failed);
    let batch = role.failed_batch.as_ref().unwrap();
    assert_eq!(batch.first_id.as_deref(), Some("1"));
    assert!(role.error.as_ref().unwrap().contains("injected"));

    assert!(!report.success);
    assert!(report.fatal_error.is_none());
    assert_eq!(report.exit_code(), EXIT_TRANSFER_ERROR);
    assert_eq!(destination.row_count("User"), 3);
    assert_eq!(destination.row_count("Post"), 3);
}

#[tokio::test]
async fn test_cancelled_run_attempts_nothing() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    let orch = orchestrator(&source, &destination, 500);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = orch.run(&blog_catalog(), &cancel).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.exit_code(), EXIT_CANCELLED);
    assert!(report
        .tables
        .iter()
        .all(|t| t.status == TableStatus::NotAttempted));
    assert_eq!(destination.row_count("User"), 0);
}

fn task_table() -> TableDescriptor {
    TableDescriptor::new(
        "Task",
        vec![
            FieldDescriptor::scalar("id"),
            FieldDescriptor::scalar("parentId"),
            FieldDescriptor::relation("parent", "Task", vec!["parentId".to_string()]),
            FieldDescriptor::inverse_relation("children", "Task"),
        ],
    )
}

#[tokio::test]
async fn test_self_referencing_rows_parent_first() {
    // Parents have higher ids than their children, so key order would break.
    let source = Arc::new(
        MemoryStore::new()
            .with_table("Task", vec![task(1, Some(3)), task(2, Some(1)), task(3, None)])
            .with_catalog(vec![task_table()]),
    );
    let destination = Arc::new(
        MemoryStore::new()
            .with_table("Task", vec![])
            .with_foreign_key("Task", "parentId", "Task"),
    );
    let orch = orchestrator(&source, &destination, 1);

    let report = orch
        .run(&[task_table()], &CancellationToken::new())
        .await
        .unwrap();

    let entry = &report.tables[0];
    assert_eq!(entry.status, TableStatus::Completed);
    assert_eq!(entry.mode, Some(TransferMode::PreOrdered));
    assert_eq!(entry.inserted, 3);
    assert_eq!(entry.cycle_warnings, 0);
    assert_eq!(source.find_all_calls("Task"), 1);
    assert_eq!(source.find_page_calls("Task"), 0);
}

#[tokio::test]
async fn test_row_cycle_is_reported() {
    let source = Arc::new(
        MemoryStore::new().with_table("Task", vec![task(1, Some(2)), task(2, Some(1))]),
    );
    let destination = Arc::new(MemoryStore::new().with_table("Task", vec![]));
    let orch = orchestrator(&source, &destination, 500);

    let report = orch
        .run(&[task_table()], &CancellationToken::new())
        .await
        .unwrap();

    let entry = &report.tables[0];
    assert_eq!(entry.status, TableStatus::Completed);
    assert_eq!(entry.cycle_warnings, 2);
    assert!(entry.warnings.iter().any(|w| w.contains("1, 2")));
    assert_eq!(destination.row_count("Task"), 2);
}

#[tokio::test]
async fn test_two_self_references_fall_back_to_pagination() {
    let node = TableDescriptor::new(
        "Node",
        vec![
            FieldDescriptor::scalar("id"),
            FieldDescriptor::relation("left", "Node", vec!["leftId".to_string()]),
            FieldDescriptor::relation("right", "Node", vec!["rightId".to_string()]),
        ],
    );
    let source = Arc::new(
        MemoryStore::new().with_table("Node", vec![Row::from_pairs([("id", Value::Int(1))])]),
    );
    let destination = Arc::new(MemoryStore::new().with_table("Node", vec![]));
    let orch = orchestrator(&source, &destination, 500);

    let report = orch.run(&[node], &CancellationToken::new()).await.unwrap();

    let entry = &report.tables[0];
    assert_eq!(entry.mode, Some(TransferMode::Paginated));
    assert_eq!(entry.warnings.len(), 1);
    assert_eq!(source.find_all_calls("Node"), 0);
}

#[tokio::test]
async fn test_table_cycle_is_counted() {
    let a = TableDescriptor::new(
        "A",
        vec![FieldDescriptor::relation("b", "B", vec!["bId".to_string()])],
    );
    let b = TableDescriptor::new(
        "B",
        vec![FieldDescriptor::relation("a", "A", vec!["aId".to_string()])],
    );
    let source = Arc::new(MemoryStore::new().with_table("A", vec![]).with_table("B", vec![]));
    let destination = Arc::new(MemoryStore::new().with_table("A", vec![]).with_table("B", vec![]));
    let orch = orchestrator(&source, &destination, 500);

    let report = orch.run(&[a, b], &CancellationToken::new()).await.unwrap();

    assert_eq!(report.cyclic_tables, vec!["A".to_string(), "B".to_string()]);
    assert!(report.tables.iter().all(|t| t.cycle_warnings == 1));
    assert_eq!(destination.bulk_insert_calls("A"), 0);
}

#[tokio::test]
async fn test_composite_key_table_is_skipped() {
    let mut tag = TableDescriptor::new("PostTag", vec![FieldDescriptor::scalar("postId")]);
    tag.single_column_key = false;
    let source = Arc::new(MemoryStore::new().with_table("PostTag", vec![]));
    let destination = Arc::new(MemoryStore::new().with_table("PostTag", vec![]));
    let orch = orchestrator(&source, &destination, 500);

    let report = orch.run(&[tag], &CancellationToken::new()).await.unwrap();

    assert_eq!(report.tables[0].status, TableStatus::Skipped);
    assert!(report.tables[0].warnings[0].contains("primary key"));
}

#[tokio::test]
async fn test_migrate_closes_stores() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    let orch = orchestrator(&source, &destination, 500);

    orch.migrate(&CancellationToken::new()).await.unwrap();

    assert!(source.is_closed());
    assert!(destination.is_closed());
}

#[tokio::test]
async fn test_migrate_closes_stores_on_failure() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    destination.set_unreachable(true);
    let orch = orchestrator(&source, &destination, 500);

    assert!(orch.migrate(&CancellationToken::new()).await.is_err());
    assert!(source.is_closed());
    assert!(destination.is_closed());
}

#[tokio::test]
async fn test_progress_updates_are_sent() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    let (tx, mut rx) = mpsc::channel(64);
    let orch = orchestrator(&source, &destination, 2).with_progress(tx);

    orch.run(&blog_catalog(), &CancellationToken::new())
        .await
        .unwrap();
    drop(orch);

    let mut user_updates = Vec::new();
    while let Some(update) = rx.recv().await {
        if update.table == "User" {
            user_updates.push(update.migrated);
        }
    }
    assert_eq!(user_updates, vec![2, 3]);
}

#[tokio::test]
async fn test_plan_and_validate() {
    let source = Arc::new(
        blog_source().with_table("Task", vec![task(1, None)]),
    );
    let destination = Arc::new(blog_destination().with_table("Task", vec![]));
    let orch = orchestrator(&source, &destination, 500);
    let mut tables = blog_catalog();
    tables.push(task_table());

    let plan = orch.plan(&tables).await.unwrap();
    let planned = plan.tables.iter().find(|t| t.table == "Task").unwrap();
    assert_eq!(planned.mode, Some(TransferMode::PreOrdered));
    assert_eq!(planned.parent_column.as_deref(), Some("parentId"));
    assert_eq!(destination.bulk_insert_calls("User"), 0);

    let before = orch.validate(&tables).await.unwrap();
    assert!(before.iter().all(|c| !c.matches()));

    orch.run(&tables, &CancellationToken::new()).await.unwrap();
    let after = orch.validate(&tables).await.unwrap();
    assert!(after.iter().all(|c| c.matches()));
}

#[tokio::test]
async fn test_health_check_reports_each_side() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    source.set_unreachable(true);
    let orch = orchestrator(&source, &destination, 500);

    let health = orch.health_check().await;

    assert!(!health.healthy);
    assert!(!health.source.connected);
    assert!(health.source.error.is_some());
    assert!(health.destination.connected);
    assert_eq!(health.destination.engine, "memory");
}

#[tokio::test]
async fn test_catalog_filters_apply() {
    let source = Arc::new(blog_source());
    let destination = Arc::new(blog_destination());
    let orch = Orchestrator::with_stores(
        source.clone(),
        destination.clone(),
        source.clone(),
        MigrationConfig {
            exclude_tables: vec!["R*".to_string()],
            ..MigrationConfig::default()
        },
    );

    let tables = orch.load_catalog().await.unwrap();
    let names: Vec<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Post", "User"]);
}
