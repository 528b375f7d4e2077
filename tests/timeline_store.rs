#[path = "helpers.rs"]
mod helpers;

use transactional_core::timeline::{PgTimelineStore, TimelineEntry, TimelineOperation, TimelineStore};

fn entry(email: &str, created_at: chrono::DateTime<chrono::Utc>) -> TimelineEntry {
    TimelineEntry {
        id: uuid::Uuid::new_v4(),
        email: email.to_string(),
        operation: TimelineOperation::Insert,
        entity_type: "contact".to_string(),
        kind: None,
        entity_id: uuid::Uuid::new_v4(),
        changes: Some(serde_json::json!({"status": "subscribed"})),
        created_at,
        db_created_at: created_at,
        entity_data: None,
    }
}

#[tokio::test]
async fn pagination_walks_every_entry_newest_first() {
    let db = helpers::workspace_db().await;
    let store = PgTimelineStore::new(db.pool.clone());

    let base = chrono::Utc::now();
    let mut entries = Vec::new();
    for i in 0..5 {
        let e = entry("person@example.com", base + chrono::Duration::seconds(i));
        store.append(e.clone()).await.unwrap();
        entries.push(e);
    }
    // Entries should be read newest first, so reverse the insertion order.
    entries.reverse();

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.read("person@example.com", Some(2), cursor.as_deref()).await.unwrap();
        seen.extend(page.entries.into_iter().map(|e| e.id));
        match page.next_cursor {
            Some(c) => cursor = Some(c),
            None => break,
        }
    }

    assert_eq!(seen, entries.iter().map(|e| e.id).collect::<Vec<_>>());
}

#[tokio::test]
async fn malformed_cursor_is_rejected_not_reset() {
    let db = helpers::workspace_db().await;
    let store = PgTimelineStore::new(db.pool.clone());

    store.append(entry("person@example.com", chrono::Utc::now())).await.unwrap();

    let err = store.read("person@example.com", Some(10), Some("not-a-valid-cursor!!!")).await.unwrap_err();
    assert!(matches!(err, transactional_core::error::CoreError::Config(_)));
}

#[tokio::test]
async fn entity_data_joins_the_contact_row_by_email() {
    let db = helpers::workspace_db().await;
    let store = PgTimelineStore::new(db.pool.clone());

    sqlx::query("INSERT INTO contacts (email, first_name) VALUES ($1, $2)")
        .bind("person@example.com")
        .bind("Ada")
        .execute(&db.pool)
        .await
        .unwrap();
    store.append(entry("person@example.com", chrono::Utc::now())).await.unwrap();

    let page = store.read("person@example.com", Some(10), None).await.unwrap();
    let data = page.entries[0].entity_data.clone().expect("contact row should be joined in");
    assert_eq!(data["first_name"], "Ada");
}

#[tokio::test]
async fn entity_data_is_null_for_entity_types_with_no_match() {
    let db = helpers::workspace_db().await;
    let store = PgTimelineStore::new(db.pool.clone());

    let mut e = entry("nobody@example.com", chrono::Utc::now());
    e.entity_type = "message".to_string();
    store.append(e).await.unwrap();

    let page = store.read("nobody@example.com", Some(10), None).await.unwrap();
    assert!(page.entries[0].entity_data.is_none(), "no message_history row exists for this entity_id");
}

#[tokio::test]
async fn read_is_scoped_to_the_requested_email() {
    let db = helpers::workspace_db().await;
    let store = PgTimelineStore::new(db.pool.clone());

    store.append(entry("a@example.com", chrono::Utc::now())).await.unwrap();
    store.append(entry("b@example.com", chrono::Utc::now())).await.unwrap();

    let page = store.read("a@example.com", Some(10), None).await.unwrap();
    assert_eq!(page.entries.len(), 1);
    assert_eq!(page.entries[0].email, "a@example.com");
    assert!(page.next_cursor.is_none());
}
