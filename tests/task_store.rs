#[path = "helpers.rs"]
mod helpers;

use transactional_core::task::{PgTaskStore, Task, TaskStatus, TaskStore};

#[tokio::test]
async fn claimed_task_is_not_reclaimed_before_timeout() {
    let db = helpers::workspace_db().await;
    let store = PgTaskStore::new(db.pool.clone());

    let task = Task::new("acme", "ping", serde_json::json!({}), 60, 3, 0);
    store.submit(task).await.unwrap();

    let first = store.claim_batch(10).await.unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].status, TaskStatus::Running);

    let second = store.claim_batch(10).await.unwrap();
    assert!(second.is_empty(), "a running task within its timeout must not be reclaimed");
}

#[tokio::test]
async fn failed_task_retries_then_succeeds() {
    let db = helpers::workspace_db().await;
    let store = PgTaskStore::new(db.pool.clone());

    let task = Task::new("acme", "ping", serde_json::json!({}), 60, 2, 0);
    let task = store.submit(task).await.unwrap();

    let claimed = store.claim_batch(10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    store.mark_failed(task.id, "transient failure").await.unwrap();
    let after_first_failure = store.get("acme", task.id).await.unwrap();
    assert_eq!(after_first_failure.status, TaskStatus::Pending);
    assert_eq!(after_first_failure.retry_count, 1);

    let reclaimed = store.claim_batch(10).await.unwrap();
    assert_eq!(reclaimed.len(), 1, "retry_interval of 0 makes the task immediately claimable again");

    store.mark_done(task.id).await.unwrap();
    let done = store.get("acme", task.id).await.unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);
}

#[tokio::test]
async fn exhausting_retries_reaches_terminal_failed() {
    let db = helpers::workspace_db().await;
    let store = PgTaskStore::new(db.pool.clone());

    let task = Task::new("acme", "ping", serde_json::json!({}), 60, 1, 0);
    let task = store.submit(task).await.unwrap();

    store.claim_batch(10).await.unwrap();
    store.mark_failed(task.id, "first failure").await.unwrap();
    assert_eq!(store.get("acme", task.id).await.unwrap().status, TaskStatus::Pending);

    store.claim_batch(10).await.unwrap();
    store.mark_failed(task.id, "second failure").await.unwrap();
    let terminal = store.get("acme", task.id).await.unwrap();
    assert_eq!(terminal.status, TaskStatus::Failed);
    assert_eq!(terminal.error_message.as_deref(), Some("second failure"));
}

#[tokio::test]
async fn subtask_rollup_marks_parent_done_when_all_complete() {
    let db = helpers::workspace_db().await;
    let store = PgTaskStore::new(db.pool.clone());

    let parent = Task::new("acme", "broadcast_send", serde_json::json!({}), 300, 0, 0);
    let parent = store.submit(parent).await.unwrap();

    let subtasks = store
        .spawn_subtasks(parent.id, vec![serde_json::json!({}), serde_json::json!({})])
        .await
        .unwrap();
    assert_eq!(subtasks.len(), 2);

    for subtask in &subtasks {
        store
            .update_subtask_progress(subtask.id, 100, TaskStatus::Completed, None)
            .await
            .unwrap();
    }

    store.rollup_subtasks(parent.id).await.unwrap();
    let rolled_up = store.get("acme", parent.id).await.unwrap();
    assert_eq!(rolled_up.status, TaskStatus::Completed);
}

#[tokio::test]
async fn subtask_rollup_fails_parent_when_any_subtask_fails() {
    let db = helpers::workspace_db().await;
    let store = PgTaskStore::new(db.pool.clone());

    let parent = Task::new("acme", "broadcast_send", serde_json::json!({}), 300, 3, 0);
    let parent = store.submit(parent).await.unwrap();

    let subtasks = store
        .spawn_subtasks(parent.id, vec![serde_json::json!({}), serde_json::json!({})])
        .await
        .unwrap();

    store
        .update_subtask_progress(subtasks[0].id, 100, TaskStatus::Completed, None)
        .await
        .unwrap();
    store
        .update_subtask_progress(subtasks[1].id, 50, TaskStatus::Failed, Some("boom".to_string()))
        .await
        .unwrap();

    store.rollup_subtasks(parent.id).await.unwrap();
    let rolled_up = store.get("acme", parent.id).await.unwrap();
    assert_eq!(rolled_up.status, TaskStatus::Failed, "one failed subtask is terminal regardless of parent retry budget");
}
