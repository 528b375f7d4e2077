use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::automation::AutomationRuntime;
use crate::domain::WorkspaceId;
use crate::error::{CoreError, CoreResult};
use crate::queue::{PgQueueStore, QueueEntry, QueueStore};
use crate::workspace::WorkspaceConnectionPool;

use super::handler::TaskHandler;
use super::model::{HandlerOutcome, Task};

fn to_outcome(result: CoreResult<()>) -> HandlerOutcome {
    match result {
        Ok(()) => HandlerOutcome::Done,
        Err(e) => HandlerOutcome::Fail { error: e.into() },
    }
}

/// Enqueues one `QueueEntry` per active recipient of a broadcast's audience
/// list (spec §4.4). `broadcasts`/`contacts`/`contact_lists` have no
/// dedicated store in this crate — owned by the external HTTP layer — so
/// this handler reads and writes them with raw SQL rather than a store
/// trait, the same way the timeline `entity_data` join does.
pub struct SendBroadcastHandler {
    workspaces: Arc<WorkspaceConnectionPool>,
}

impl SendBroadcastHandler {
    pub fn new(workspaces: Arc<WorkspaceConnectionPool>) -> Self {
        Self { workspaces }
    }

    async fn send(&self, task: &Task) -> CoreResult<()> {
        let broadcast_id = task
            .broadcast_id
            .ok_or_else(|| CoreError::Config("send_broadcast task has no broadcast_id".to_string()))?;
        let workspace_id =
            WorkspaceId::parse(task.workspace_id.clone()).map_err(CoreError::Config)?;
        let pool = self.workspaces.get(&workspace_id).await?;

        let broadcast = sqlx::query("SELECT audience, winning_template FROM broadcasts WHERE id = $1")
            .bind(broadcast_id)
            .fetch_optional(&pool)
            .await?
            .ok_or_else(|| CoreError::not_found("broadcast", broadcast_id.to_string()))?;

        let audience: serde_json::Value = broadcast.get("audience");
        let winning_template: Option<Uuid> = broadcast.get("winning_template");
        let list_id: Uuid = audience
            .get("list_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| CoreError::Config("broadcast audience is missing a list_id".to_string()))?;

        let recipients = sqlx::query(
            r#"
            SELECT c.email
            FROM contact_lists cl
            JOIN contacts c ON c.email = cl.email
            WHERE cl.list_id = $1 AND cl.status = 'active' AND cl.deleted_at IS NULL
            "#,
        )
        .bind(list_id)
        .fetch_all(&pool)
        .await?;

        let entries: Vec<QueueEntry> = recipients
            .iter()
            .map(|row| {
                let email: String = row.get("email");
                QueueEntry::new(
                    task.workspace_id.clone(),
                    email,
                    winning_template,
                    serde_json::Value::Null,
                    "broadcast",
                    broadcast_id,
                    None,
                    None,
                )
            })
            .collect();
        let enqueued = entries.len() as i64;

        let queue_store = PgQueueStore::new(pool.clone());
        let mut tx = pool.begin().await?;
        queue_store
            .enqueue_tx(&mut tx, &task.workspace_id, entries)
            .await?;
        sqlx::query(
            r#"
            UPDATE broadcasts
            SET status = 'processed', enqueued_count = enqueued_count + $2,
                winner_sent_at = NOW(), completed_at = NOW(), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(broadcast_id)
        .bind(enqueued)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }
}

#[async_trait]
impl TaskHandler for SendBroadcastHandler {
    async fn handle(&self, _cancel: CancellationToken, task: Task) -> HandlerOutcome {
        to_outcome(self.send(&task).await)
    }
}

/// Forces one automation tick for the task's own workspace (spec §4.3),
/// sharing the same `AutomationRuntime` instance the background loop
/// drives so there is exactly one claim/step path per process.
pub struct AutomationTickHandler {
    runtime: Arc<AutomationRuntime>,
    batch: i64,
}

impl AutomationTickHandler {
    pub fn new(runtime: Arc<AutomationRuntime>, batch: i64) -> Self {
        Self { runtime, batch }
    }

    async fn tick(&self, task: &Task) -> CoreResult<()> {
        let workspace_id =
            WorkspaceId::parse(task.workspace_id.clone()).map_err(CoreError::Config)?;
        self.runtime.tick_workspace(&workspace_id, self.batch).await?;
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for AutomationTickHandler {
    async fn handle(&self, _cancel: CancellationToken, task: Task) -> HandlerOutcome {
        to_outcome(self.tick(&task).await)
    }
}

const DEFAULT_DEAD_LETTER_RETENTION_DAYS: i64 = 30;

/// Purges the dead-letter queue rows older than a retention window (spec
/// §4.2). The window comes from the task's own `state` (`older_than_days`)
/// since there is no dedicated cleanup settings section — callers that
/// want a non-default window set it when they submit the task.
pub struct CleanupHandler {
    workspaces: Arc<WorkspaceConnectionPool>,
}

impl CleanupHandler {
    pub fn new(workspaces: Arc<WorkspaceConnectionPool>) -> Self {
        Self { workspaces }
    }

    async fn cleanup(&self, task: &Task) -> CoreResult<()> {
        let workspace_id =
            WorkspaceId::parse(task.workspace_id.clone()).map_err(CoreError::Config)?;
        let pool = self.workspaces.get(&workspace_id).await?;
        let queue_store = PgQueueStore::new(pool);

        let retention_days = task
            .state
            .get("older_than_days")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_DEAD_LETTER_RETENTION_DAYS);
        let older_than = Utc::now() - Duration::days(retention_days);

        let removed = queue_store
            .cleanup_dead_letter(&task.workspace_id, older_than)
            .await?;
        tracing::info!(workspace_id = %task.workspace_id, removed, "purged dead-letter queue rows");
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for CleanupHandler {
    async fn handle(&self, _cancel: CancellationToken, task: Task) -> HandlerOutcome {
        to_outcome(self.cleanup(&task).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_outcome_maps_ok_to_done_and_err_to_fail() {
        assert!(matches!(to_outcome(Ok(())), HandlerOutcome::Done));
        let err = CoreError::Config("boom".to_string());
        assert!(matches!(to_outcome(Err(err)), HandlerOutcome::Fail { .. }));
    }
}
