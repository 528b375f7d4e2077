#[path = "helpers.rs"]
mod helpers;

use std::collections::HashMap;

use transactional_core::automation::{
    Automation, AutomationStatus, AutomationStore, ContactAutomation, ContactAutomationStatus,
    Node, PgAutomationStore, TriggerConfig, WaitUntil,
};

fn sample_automation() -> Automation {
    let mut nodes = HashMap::new();
    nodes.insert(
        "wait".to_string(),
        Node::Wait {
            until: WaitUntil::Duration { duration_seconds: 0, next: "exit".to_string() },
        },
    );
    nodes.insert("exit".to_string(), Node::Exit { reason: "done".to_string() });

    let now = chrono::Utc::now();
    Automation {
        id: uuid::Uuid::new_v4(),
        workspace_id: "acme".to_string(),
        name: "Welcome".to_string(),
        status: AutomationStatus::Live,
        list_id: None,
        trigger_config: None,
        trigger_sql: None,
        root_node_id: "wait".to_string(),
        nodes,
        stats: serde_json::json!({}),
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

#[tokio::test]
async fn enroll_and_claim_due_run() {
    let db = helpers::workspace_db().await;
    let store = PgAutomationStore::new(db.pool.clone());

    let automation = store.create(sample_automation()).await.unwrap();
    let mut run = ContactAutomation::enroll(automation.id, "person@example.com", &automation.root_node_id, serde_json::json!({}));
    run.scheduled_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
    store.enroll(run).await.unwrap();

    let due = store.claim_due_runs(10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].0.contact_email, "person@example.com");

    // Claiming clears scheduled_at, so a second claim sees nothing due.
    let second = store.claim_due_runs(10).await.unwrap();
    assert!(second.is_empty());
}

#[tokio::test]
async fn duplicate_active_enrollment_is_rejected() {
    let db = helpers::workspace_db().await;
    let store = PgAutomationStore::new(db.pool.clone());

    let automation = store.create(sample_automation()).await.unwrap();
    let run_a = ContactAutomation::enroll(automation.id, "person@example.com", &automation.root_node_id, serde_json::json!({}));
    store.enroll(run_a).await.unwrap();

    let run_b = ContactAutomation::enroll(automation.id, "person@example.com", &automation.root_node_id, serde_json::json!({}));
    let err = store.enroll(run_b).await.unwrap_err();
    assert!(matches!(err, transactional_core::error::CoreError::ConflictExists { .. }));
}

#[tokio::test]
async fn reenrollment_is_allowed_after_exit() {
    let db = helpers::workspace_db().await;
    let store = PgAutomationStore::new(db.pool.clone());

    let automation = store.create(sample_automation()).await.unwrap();
    let mut run_a = ContactAutomation::enroll(automation.id, "person@example.com", &automation.root_node_id, serde_json::json!({}));
    run_a = store.enroll(run_a).await.unwrap();

    run_a.status = ContactAutomationStatus::Exited;
    run_a.exit_reason = Some("done".to_string());
    run_a.scheduled_at = None;
    store.save_run(&run_a).await.unwrap();

    let run_b = ContactAutomation::enroll(automation.id, "person@example.com", &automation.root_node_id, serde_json::json!({}));
    store.enroll(run_b).await.unwrap();
}

#[tokio::test]
async fn activate_installs_trigger_and_enrolls_via_insert() {
    let db = helpers::workspace_db().await;
    let store = PgAutomationStore::new(db.pool.clone());

    let mut automation = sample_automation();
    automation.trigger_config = Some(TriggerConfig {
        entity_type: "contact".to_string(),
        operation: "insert".to_string(),
        kind: None,
    });
    let automation = store.create(automation).await.unwrap();

    store.activate(automation.id).await.unwrap();

    let activated = store.get(automation.id, false).await.unwrap();
    assert_eq!(activated.status, AutomationStatus::Live);
    assert!(activated.trigger_sql.is_some());

    // Inserting a matching contact_timeline row should fire the trigger and
    // enroll the contact without any Rust-side enroll() call.
    sqlx::query(
        "INSERT INTO contact_timeline (id, email, operation, entity_type, entity_id, created_at) \
         VALUES ($1, $2, 'insert', 'contact', $3, NOW())",
    )
    .bind(uuid::Uuid::new_v4())
    .bind("triggered@example.com")
    .bind(uuid::Uuid::new_v4())
    .execute(&db.pool)
    .await
    .unwrap();

    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM contact_automations WHERE automation_id = $1 AND contact_email = $2",
    )
    .bind(automation.id)
    .bind("triggered@example.com")
    .fetch_one(&db.pool)
    .await
    .unwrap();
    assert_eq!(row.0, 1);

    // Re-activating is idempotent: the drop-then-create pair must not fail
    // when the trigger/function already exist.
    store.activate(automation.id).await.unwrap();
}

#[tokio::test]
async fn soft_delete_drops_the_installed_trigger() {
    let db = helpers::workspace_db().await;
    let store = PgAutomationStore::new(db.pool.clone());

    let mut automation = sample_automation();
    automation.trigger_config = Some(TriggerConfig {
        entity_type: "contact".to_string(),
        operation: "insert".to_string(),
        kind: None,
    });
    let automation = store.create(automation).await.unwrap();
    store.activate(automation.id).await.unwrap();

    store.soft_delete(automation.id).await.unwrap();

    let trigger_name = format!("automation_trigger_{}", automation.id.simple());
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM pg_trigger WHERE tgname = $1")
        .bind(&trigger_name)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(row.0, 0, "deleting the automation must drop its trigger");
}

#[tokio::test]
async fn soft_delete_exits_active_runs() {
    let db = helpers::workspace_db().await;
    let store = PgAutomationStore::new(db.pool.clone());

    let automation = store.create(sample_automation()).await.unwrap();
    let run = ContactAutomation::enroll(automation.id, "person@example.com", &automation.root_node_id, serde_json::json!({}));
    let run = store.enroll(run).await.unwrap();

    let exited_count = store.soft_delete(automation.id).await.unwrap();
    assert_eq!(exited_count, 1);

    let due = store.claim_due_runs(10).await.unwrap();
    assert!(due.is_empty(), "a deleted automation's runs must never be claimed again");

    // Direct lookup to confirm the run itself carries the exit marker.
    let row: (String,) = sqlx::query_as("SELECT status::text FROM contact_automations WHERE id = $1")
        .bind(run.id)
        .fetch_one(&db.pool)
        .await
        .unwrap();
    assert_eq!(row.0, "exited");
}
