#[path = "helpers.rs"]
mod helpers;

use transactional_core::domain::WorkspaceId;
use transactional_core::error::CoreError;
use transactional_core::workspace::{PgWorkspaceStore, Workspace, WorkspaceStore};

#[tokio::test]
async fn create_get_list_delete_round_trip() {
    let db = helpers::system_db().await;
    let store = PgWorkspaceStore::new(db.pool.clone());

    let id = WorkspaceId::parse("acme-prod".to_string()).unwrap();
    let created = store.create(Workspace::new(id.clone(), "Acme Prod")).await.unwrap();
    assert_eq!(created.id, id);

    let fetched = store.get(&id).await.unwrap();
    assert_eq!(fetched.name, "Acme Prod");

    let all = store.list().await.unwrap();
    assert_eq!(all.len(), 1);

    store.delete(&id).await.unwrap();
    let err = store.get(&id).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}

#[tokio::test]
async fn duplicate_id_is_a_conflict() {
    let db = helpers::system_db().await;
    let store = PgWorkspaceStore::new(db.pool.clone());

    let id = WorkspaceId::parse("acme-prod".to_string()).unwrap();
    store.create(Workspace::new(id.clone(), "Acme Prod")).await.unwrap();

    let err = store
        .create(Workspace::new(id, "Acme Prod Again"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::ConflictExists { .. }));
}

#[tokio::test]
async fn deleting_unknown_workspace_is_not_found() {
    let db = helpers::system_db().await;
    let store = PgWorkspaceStore::new(db.pool.clone());

    let id = WorkspaceId::parse("ghost".to_string()).unwrap();
    let err = store.delete(&id).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
}
