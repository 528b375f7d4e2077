#[path = "helpers.rs"]
mod helpers;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use transactional_core::domain::WorkspaceId;
use transactional_core::queue::{PgQueueStore, QueueEntry, QueueStore};
use transactional_core::task::{
    CleanupHandler, HandlerOutcome, SendBroadcastHandler, Task, TaskHandler,
};
use transactional_core::workspace::{PgWorkspaceStore, Workspace, WorkspaceConnectionPool, WorkspaceStore};

/// Registers `workspace_db` under `workspace_id` in the system database and
/// returns a pool that resolves to it, the same wiring `run_worker` does
/// against the real registry.
async fn connection_pool(
    system_db: &helpers::TestDatabase,
    workspace_db: &helpers::TestDatabase,
    workspace_id: &str,
) -> Arc<WorkspaceConnectionPool> {
    let store: Arc<dyn WorkspaceStore> = Arc::new(PgWorkspaceStore::new(system_db.pool.clone()));
    let id = WorkspaceId::parse(workspace_id.to_string()).unwrap();
    let mut workspace = Workspace::new(id, "Test Workspace");
    workspace.settings = serde_json::json!({ "database_name": workspace_db.name });
    store.create(workspace).await.unwrap();

    Arc::new(WorkspaceConnectionPool::new(workspace_db.template.clone(), store))
}

#[tokio::test]
async fn send_broadcast_enqueues_every_active_list_member() {
    let system_db = helpers::system_db().await;
    let workspace_db = helpers::workspace_db().await;
    let pool = connection_pool(&system_db, &workspace_db, "acme").await;

    let list_id = Uuid::new_v4();
    sqlx::query("INSERT INTO lists (id, name) VALUES ($1, $2)")
        .bind(list_id)
        .bind("Newsletter")
        .execute(&workspace_db.pool)
        .await
        .unwrap();

    for (email, status) in [
        ("a@example.com", "active"),
        ("b@example.com", "active"),
        ("c@example.com", "unsubscribed"),
    ] {
        sqlx::query("INSERT INTO contacts (email) VALUES ($1)")
            .bind(email)
            .execute(&workspace_db.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO contact_lists (email, list_id, status) VALUES ($1, $2, $3::contact_list_status)")
            .bind(email)
            .bind(list_id)
            .bind(status)
            .execute(&workspace_db.pool)
            .await
            .unwrap();
    }

    let broadcast_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO broadcasts (id, workspace_id, name, audience) VALUES ($1, $2, $3, $4)",
    )
    .bind(broadcast_id)
    .bind("acme")
    .bind("July newsletter")
    .bind(serde_json::json!({ "list_id": list_id }))
    .execute(&workspace_db.pool)
    .await
    .unwrap();

    let mut task = Task::new("acme", "send_broadcast", serde_json::json!({}), 300, 0, 60);
    task.broadcast_id = Some(broadcast_id);

    let handler = SendBroadcastHandler::new(pool);
    let outcome = handler.handle(CancellationToken::new(), task).await;
    assert!(matches!(outcome, HandlerOutcome::Done));

    let queue_store = PgQueueStore::new(workspace_db.pool.clone());
    let stats = queue_store.get_stats("acme").await.unwrap();
    assert_eq!(stats.pending, 2, "only the two active contacts should be enqueued");

    let enqueued_count: i64 = sqlx::query_scalar("SELECT enqueued_count FROM broadcasts WHERE id = $1")
        .bind(broadcast_id)
        .fetch_one(&workspace_db.pool)
        .await
        .unwrap();
    assert_eq!(enqueued_count, 2);
}

#[tokio::test]
async fn send_broadcast_fails_without_a_broadcast_id() {
    let system_db = helpers::system_db().await;
    let workspace_db = helpers::workspace_db().await;
    let pool = connection_pool(&system_db, &workspace_db, "acme").await;

    let task = Task::new("acme", "send_broadcast", serde_json::json!({}), 300, 0, 60);
    let handler = SendBroadcastHandler::new(pool);
    let outcome = handler.handle(CancellationToken::new(), task).await;
    assert!(matches!(outcome, HandlerOutcome::Fail { .. }));
}

#[tokio::test]
async fn cleanup_purges_dead_letter_rows_past_the_retention_window() {
    let system_db = helpers::system_db().await;
    let workspace_db = helpers::workspace_db().await;
    let pool = connection_pool(&system_db, &workspace_db, "acme").await;

    let entry = QueueEntry::new(
        "acme",
        "gone@example.com",
        None,
        serde_json::json!({}),
        "transactional",
        Uuid::new_v4(),
        None,
        None,
    );
    let queue_store = PgQueueStore::new(workspace_db.pool.clone());
    queue_store.enqueue("acme", vec![entry.clone()]).await.unwrap();
    queue_store.mark_as_processing("acme", entry.id).await.unwrap();
    queue_store
        .move_to_dead_letter("acme", &entry, "provider rejected")
        .await
        .unwrap();

    sqlx::query("UPDATE email_queue_dead_letter SET failed_at = $1 WHERE original_entry_id = $2")
        .bind(Utc::now() - chrono::Duration::days(40))
        .bind(entry.id)
        .execute(&workspace_db.pool)
        .await
        .unwrap();

    let task = Task::new(
        "acme",
        "cleanup",
        serde_json::json!({ "older_than_days": 30 }),
        300,
        0,
        60,
    );

    let handler = CleanupHandler::new(pool);
    let outcome = handler.handle(CancellationToken::new(), task).await;
    assert!(matches!(outcome, HandlerOutcome::Done));

    let stats = queue_store.get_stats("acme").await.unwrap();
    assert_eq!(stats.dead_letter, 0);
}
