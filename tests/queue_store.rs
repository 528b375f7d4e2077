#[path = "helpers.rs"]
mod helpers;

use transactional_core::queue::{PgQueueStore, QueueEntry, QueueStore};

#[tokio::test]
async fn enqueue_fetch_claim_and_sent_round_trip() {
    let db = helpers::workspace_db().await;
    let store = PgQueueStore::new(db.pool.clone());

    let entry = QueueEntry::new(
        "acme",
        "person@example.com",
        Some(uuid::Uuid::new_v4()),
        serde_json::json!({"name": "Ada"}),
        "transactional",
        uuid::Uuid::new_v4(),
        None,
        None,
    );
    let id = entry.id;
    store.enqueue("acme", vec![entry]).await.unwrap();

    let pending = store.fetch_pending("acme", 10).await.unwrap();
    assert_eq!(pending.len(), 1);

    let claimed = store.mark_as_processing("acme", id).await.unwrap();
    assert!(claimed);

    // A second claim attempt on the same row is a normal no-op, not an error.
    let reclaimed = store.mark_as_processing("acme", id).await.unwrap();
    assert!(!reclaimed);

    store.mark_as_sent("acme", id).await.unwrap();
    let stats = store.get_stats("acme").await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 0);
}

#[tokio::test]
async fn failed_entry_with_retry_goes_back_to_pending() {
    let db = helpers::workspace_db().await;
    let store = PgQueueStore::new(db.pool.clone());

    let entry = QueueEntry::new(
        "acme",
        "person@example.com",
        Some(uuid::Uuid::new_v4()),
        serde_json::json!({}),
        "transactional",
        uuid::Uuid::new_v4(),
        None,
        None,
    );
    let id = entry.id;
    store.enqueue("acme", vec![entry]).await.unwrap();
    store.mark_as_processing("acme", id).await.unwrap();

    let next_retry = chrono::Utc::now() - chrono::Duration::seconds(1);
    store
        .mark_as_failed("acme", id, "transient", Some(next_retry))
        .await
        .unwrap();

    let pending = store.fetch_pending("acme", 10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 1);
}

#[tokio::test]
async fn permanent_failure_moves_to_dead_letter_and_can_be_retried() {
    let db = helpers::workspace_db().await;
    let store = PgQueueStore::new(db.pool.clone());

    let mut entry = QueueEntry::new(
        "acme",
        "person@example.com",
        Some(uuid::Uuid::new_v4()),
        serde_json::json!({}),
        "transactional",
        uuid::Uuid::new_v4(),
        None,
        None,
    );
    entry.integration_id = Some(uuid::Uuid::new_v4());
    entry.provider_kind = Some("ses".to_string());
    let id = entry.id;
    store.enqueue("acme", vec![entry.clone()]).await.unwrap();

    store.move_to_dead_letter("acme", &entry, "bounce: hard").await.unwrap();

    let stats = store.get_stats("acme").await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.dead_letter, 1);

    let by_source = store.get_by_source_id("acme", "transactional", entry.source_id).await.unwrap();
    assert!(by_source.is_empty(), "the original row is gone once dead-lettered");

    // Find the dead-letter row's id by re-enqueuing nothing and instead
    // reading stats; retry_dead_letter needs the dead-letter id, fetched via
    // a direct query since there is no list_dead_letters operation.
    let row: (uuid::Uuid,) = sqlx::query_as("SELECT id FROM email_queue_dead_letter WHERE original_entry_id = $1")
        .bind(id)
        .fetch_one(&db.pool)
        .await
        .unwrap();

    let restored = store.retry_dead_letter("acme", row.0).await.unwrap();
    assert_eq!(restored.to_address, "person@example.com");
    assert_eq!(restored.integration_id, Some(entry.integration_id.unwrap()));
    assert_eq!(restored.provider_kind.as_deref(), Some("ses"));

    let stats_after = store.get_stats("acme").await.unwrap();
    assert_eq!(stats_after.pending, 1);
    assert_eq!(stats_after.dead_letter, 0);
}
