use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::model::{DeadLetterEntry, QueueEntry, QueueEntryStatus, QueueStats};

pub type PgTx<'a> = Transaction<'a, Postgres>;

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, workspace_id: &str, entries: Vec<QueueEntry>) -> CoreResult<()>;
    async fn enqueue_tx(
        &self,
        tx: &mut PgTx<'_>,
        workspace_id: &str,
        entries: Vec<QueueEntry>,
    ) -> CoreResult<()>;
    async fn fetch_pending(&self, workspace_id: &str, n: i64) -> CoreResult<Vec<QueueEntry>>;
    /// CAS on `status = 'pending'`; returns `false` (never an error) when
    /// another worker already claimed the row — spec §4.2's "skip on CAS
    /// failure" is a normal, expected outcome, not a fault.
    async fn mark_as_processing(&self, workspace_id: &str, id: Uuid) -> CoreResult<bool>;
    async fn mark_as_sent(&self, workspace_id: &str, id: Uuid) -> CoreResult<()>;
    async fn mark_as_failed(
        &self,
        workspace_id: &str,
        id: Uuid,
        err: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;
    async fn move_to_dead_letter(
        &self,
        workspace_id: &str,
        entry: &QueueEntry,
        final_err: &str,
    ) -> CoreResult<()>;
    async fn get_stats(&self, workspace_id: &str) -> CoreResult<QueueStats>;
    async fn get_by_source_id(
        &self,
        workspace_id: &str,
        source_type: &str,
        source_id: Uuid,
    ) -> CoreResult<Vec<QueueEntry>>;
    async fn cleanup_dead_letter(
        &self,
        workspace_id: &str,
        older_than: DateTime<Utc>,
    ) -> CoreResult<u64>;
    async fn retry_dead_letter(&self, workspace_id: &str, dead_letter_id: Uuid) -> CoreResult<QueueEntry>;
}

pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct QueueRow {
    id: Uuid,
    workspace_id: String,
    status: QueueEntryStatus,
    priority: i16,
    to_address: String,
    integration_id: Option<Uuid>,
    provider_kind: Option<String>,
    template_id: Option<Uuid>,
    template_data: serde_json::Value,
    source_type: String,
    source_id: Uuid,
    client_message_id: Option<String>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    next_retry_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QueueRow> for QueueEntry {
    fn from(r: QueueRow) -> Self {
        QueueEntry {
            id: r.id,
            workspace_id: r.workspace_id,
            status: r.status,
            priority: r.priority,
            to_address: r.to_address,
            integration_id: r.integration_id,
            provider_kind: r.provider_kind,
            template_id: r.template_id,
            template_data: r.template_data,
            source_type: r.source_type,
            source_id: r.source_id,
            client_message_id: r.client_message_id,
            attempts: r.attempts,
            max_attempts: r.max_attempts,
            last_error: r.last_error,
            next_retry_at: r.next_retry_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const QUEUE_COLUMNS: &str = "id, workspace_id, status, priority, to_address, integration_id, \
    provider_kind, template_id, template_data, source_type, source_id, client_message_id, \
    attempts, max_attempts, last_error, next_retry_at, created_at, updated_at";

/// Batch insert as a sequence of bound inserts on the same executor —
/// one transaction when called with a transaction executor, autocommit
/// per-row otherwise. Spec §4.2 only requires the whole batch to commit
/// atomically when a transaction is supplied (`EnqueueTx`); `Enqueue`'s
/// own atomicity is provided by wrapping this in `pool.begin()`.
async fn insert_entries<'e, E>(executor: E, workspace_id: &str, entries: Vec<QueueEntry>) -> CoreResult<()>
where
    E: sqlx::PgExecutor<'e>,
{
    if entries.is_empty() {
        return Ok(());
    }

    let mut builder = sqlx::QueryBuilder::new(
        "INSERT INTO email_queue (id, workspace_id, status, priority, to_address, \
         integration_id, provider_kind, template_id, template_data, source_type, source_id, \
         client_message_id, attempts, max_attempts, last_error, next_retry_at, created_at, updated_at) ",
    );

    builder.push_values(entries, |mut row, e| {
        row.push_bind(e.id)
            .push_bind(workspace_id.to_string())
            .push_bind(e.status)
            .push_bind(e.priority)
            .push_bind(e.to_address)
            .push_bind(e.integration_id)
            .push_bind(e.provider_kind)
            .push_bind(e.template_id)
            .push_bind(e.template_data)
            .push_bind(e.source_type)
            .push_bind(e.source_id)
            .push_bind(e.client_message_id)
            .push_bind(e.attempts)
            .push_bind(e.max_attempts)
            .push_bind(e.last_error)
            .push_bind(e.next_retry_at)
            .push_bind(e.created_at)
            .push_bind(e.updated_at);
    });

    builder.build().execute(executor).await?;
    Ok(())
}

#[async_trait]
impl QueueStore for PgQueueStore {
    #[tracing::instrument(name = "enqueue", skip(self, entries), fields(workspace_id = %workspace_id, n = entries.len()))]
    async fn enqueue(&self, workspace_id: &str, entries: Vec<QueueEntry>) -> CoreResult<()> {
        insert_entries(&self.pool, workspace_id, entries).await
    }

    #[tracing::instrument(name = "enqueue_tx", skip(self, tx, entries), fields(workspace_id = %workspace_id, n = entries.len()))]
    async fn enqueue_tx(
        &self,
        tx: &mut PgTx<'_>,
        workspace_id: &str,
        entries: Vec<QueueEntry>,
    ) -> CoreResult<()> {
        insert_entries(&mut **tx, workspace_id, entries).await
    }

    #[tracing::instrument(name = "fetch pending queue entries", skip(self), fields(workspace_id = %workspace_id))]
    async fn fetch_pending(&self, workspace_id: &str, n: i64) -> CoreResult<Vec<QueueEntry>> {
        let sql = format!(
            r#"
            SELECT {QUEUE_COLUMNS}
            FROM email_queue
            WHERE workspace_id = $1
                AND status = 'pending'
                AND (next_retry_at IS NULL OR next_retry_at <= NOW())
            ORDER BY priority ASC, created_at ASC
            LIMIT $2
            "#
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(workspace_id)
            .bind(n)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(QueueEntry::from).collect())
    }

    #[tracing::instrument(name = "mark queue entry processing", skip(self), fields(workspace_id = %workspace_id, entry_id = %id))]
    async fn mark_as_processing(&self, workspace_id: &str, id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'processing', updated_at = NOW()
            WHERE id = $1 AND workspace_id = $2 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "mark queue entry sent", skip(self), fields(workspace_id = %workspace_id, entry_id = %id))]
    async fn mark_as_sent(&self, workspace_id: &str, id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM email_queue WHERE id = $1 AND workspace_id = $2")
            .bind(id)
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "mark queue entry failed", skip(self, err), fields(workspace_id = %workspace_id, entry_id = %id))]
    async fn mark_as_failed(
        &self,
        workspace_id: &str,
        id: Uuid,
        err: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE email_queue
            SET status = 'failed', attempts = attempts + 1, last_error = $3,
                next_retry_at = $4, updated_at = NOW()
            WHERE id = $1 AND workspace_id = $2
            "#,
        )
        .bind(id)
        .bind(workspace_id)
        .bind(err)
        .bind(next_retry_at)
        .execute(&self.pool)
        .await?;

        // A row left in `failed` with a retry timestamp is still eligible
        // for the next `FetchPending` once that timestamp lands, so flip
        // it back to `pending` — `failed` here means "attempt failed",
        // not "terminal".
        if next_retry_at.is_some() {
            sqlx::query(
                "UPDATE email_queue SET status = 'pending' WHERE id = $1 AND workspace_id = $2",
            )
            .bind(id)
            .bind(workspace_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    #[tracing::instrument(name = "move queue entry to dead letter", skip(self, entry, final_err), fields(workspace_id = %workspace_id, entry_id = %entry.id))]
    async fn move_to_dead_letter(
        &self,
        workspace_id: &str,
        entry: &QueueEntry,
        final_err: &str,
    ) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO email_queue_dead_letter (
                id, workspace_id, original_entry_id, to_address, integration_id, provider_kind,
                template_id, template_data, source_type, source_id, attempts, final_error, failed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workspace_id)
        .bind(entry.id)
        .bind(&entry.to_address)
        .bind(entry.integration_id)
        .bind(&entry.provider_kind)
        .bind(entry.template_id)
        .bind(&entry.template_data)
        .bind(&entry.source_type)
        .bind(entry.source_id)
        .bind(entry.attempts + 1)
        .bind(final_err)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM email_queue WHERE id = $1 AND workspace_id = $2")
            .bind(entry.id)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(name = "get queue stats", skip(self), fields(workspace_id = %workspace_id))]
    async fn get_stats(&self, workspace_id: &str) -> CoreResult<QueueStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'processing') AS processing,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed
            FROM email_queue
            WHERE workspace_id = $1
            "#,
        )
        .bind(workspace_id)
        .fetch_one(&self.pool)
        .await?;

        let dead_letter: i64 =
            sqlx::query("SELECT COUNT(*) AS count FROM email_queue_dead_letter WHERE workspace_id = $1")
                .bind(workspace_id)
                .fetch_one(&self.pool)
                .await?
                .get("count");

        Ok(QueueStats {
            pending: row.get("pending"),
            processing: row.get("processing"),
            failed: row.get("failed"),
            dead_letter,
        })
    }

    #[tracing::instrument(name = "get queue entries by source", skip(self), fields(workspace_id = %workspace_id))]
    async fn get_by_source_id(
        &self,
        workspace_id: &str,
        source_type: &str,
        source_id: Uuid,
    ) -> CoreResult<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {QUEUE_COLUMNS} FROM email_queue WHERE workspace_id = $1 AND source_type = $2 AND source_id = $3"
        );
        let rows: Vec<QueueRow> = sqlx::query_as(&sql)
            .bind(workspace_id)
            .bind(source_type)
            .bind(source_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(QueueEntry::from).collect())
    }

    #[tracing::instrument(name = "cleanup dead letter", skip(self), fields(workspace_id = %workspace_id))]
    async fn cleanup_dead_letter(
        &self,
        workspace_id: &str,
        older_than: DateTime<Utc>,
    ) -> CoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM email_queue_dead_letter WHERE workspace_id = $1 AND failed_at < $2",
        )
        .bind(workspace_id)
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "retry dead letter entry", skip(self), fields(workspace_id = %workspace_id, dead_letter_id = %dead_letter_id))]
    async fn retry_dead_letter(&self, workspace_id: &str, dead_letter_id: Uuid) -> CoreResult<QueueEntry> {
        let mut tx = self.pool.begin().await?;

        let dl: DeadLetterEntry = {
            let row = sqlx::query(
                r#"
                SELECT id, workspace_id, original_entry_id, to_address, integration_id,
                       provider_kind, template_id, template_data, source_type, source_id,
                       attempts, final_error, failed_at
                FROM email_queue_dead_letter
                WHERE id = $1 AND workspace_id = $2
                "#,
            )
            .bind(dead_letter_id)
            .bind(workspace_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| CoreError::not_found("dead_letter_entry", dead_letter_id.to_string()))?;

            DeadLetterEntry {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                original_entry_id: row.get("original_entry_id"),
                to_address: row.get("to_address"),
                integration_id: row.get("integration_id"),
                provider_kind: row.get("provider_kind"),
                template_id: row.get("template_id"),
                template_data: row.get("template_data"),
                source_type: row.get("source_type"),
                source_id: row.get("source_id"),
                attempts: row.get("attempts"),
                final_error: row.get("final_error"),
                failed_at: row.get("failed_at"),
            }
        };

        let mut restored = QueueEntry::new(
            workspace_id,
            dl.to_address,
            dl.template_id,
            dl.template_data,
            dl.source_type,
            dl.source_id,
            None,
            None,
        );
        restored.integration_id = dl.integration_id;
        restored.provider_kind = dl.provider_kind;

        insert_entries(&mut *tx, workspace_id, vec![restored.clone()]).await?;

        sqlx::query("DELETE FROM email_queue_dead_letter WHERE id = $1 AND workspace_id = $2")
            .bind(dead_letter_id)
            .bind(workspace_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(restored)
    }
}
