use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::Cursor;
use crate::error::CoreResult;

use super::model::{TimelineEntry, TimelinePage};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 100;

#[async_trait]
pub trait TimelineStore: Send + Sync {
    async fn append(&self, entry: TimelineEntry) -> CoreResult<()>;
    /// Cursor-paginated read, ordered `(created_at DESC, id DESC)` (spec
    /// §4.5). `limit` is clamped to `[1, 100]`; `None` defaults to 50.
    async fn read(&self, email: &str, limit: Option<i64>, cursor: Option<&str>) -> CoreResult<TimelinePage>;
}

pub struct PgTimelineStore {
    pool: PgPool,
}

impl PgTimelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &sqlx::postgres::PgRow) -> TimelineEntry {
    TimelineEntry {
        id: row.get("id"),
        email: row.get("email"),
        operation: row.get("operation"),
        entity_type: row.get("entity_type"),
        kind: row.get("kind"),
        entity_id: row.get("entity_id"),
        changes: row.get("changes"),
        created_at: row.get("created_at"),
        db_created_at: row.get("db_created_at"),
        entity_data: row.get("entity_data"),
    }
}

#[async_trait]
impl TimelineStore for PgTimelineStore {
    #[tracing::instrument(name = "append timeline entry", skip(self, entry), fields(email = %entry.email, entity_type = %entry.entity_type))]
    async fn append(&self, entry: TimelineEntry) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO contact_timeline (
                id, email, operation, entity_type, kind, entity_id, changes, created_at, db_created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.email)
        .bind(entry.operation)
        .bind(&entry.entity_type)
        .bind(&entry.kind)
        .bind(entry.entity_id)
        .bind(&entry.changes)
        .bind(entry.created_at)
        .bind(entry.db_created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(name = "read timeline", skip(self), fields(email = %email))]
    async fn read(&self, email: &str, limit: Option<i64>, cursor: Option<&str>) -> CoreResult<TimelinePage> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

        let decoded = cursor.map(Cursor::decode).transpose()?;

        // entity_data is a per-entity_type join: "contact" keys off the
        // row's own email (contacts' PK), everything else keys off
        // entity_id against the table that owns it. Unrecognized
        // entity_types (future kinds) fall back to NULL rather than erroring.
        let rows = match &decoded {
            Some(c) => {
                sqlx::query(
                    r#"
                    SELECT t.id, t.email, t.operation, t.entity_type, t.kind, t.entity_id, t.changes,
                           t.created_at, t.db_created_at, entity_data(t.entity_type, t.email, t.entity_id) AS entity_data
                    FROM contact_timeline t
                    WHERE t.email = $1
                      AND (t.created_at < $2 OR (t.created_at = $2 AND t.id::text < $3))
                    ORDER BY t.created_at DESC, t.id DESC
                    LIMIT $4
                    "#,
                )
                .bind(email)
                .bind(c.created_at)
                .bind(&c.id)
                .bind(limit + 1)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT t.id, t.email, t.operation, t.entity_type, t.kind, t.entity_id, t.changes,
                           t.created_at, t.db_created_at, entity_data(t.entity_type, t.email, t.entity_id) AS entity_data
                    FROM contact_timeline t
                    WHERE t.email = $1
                    ORDER BY t.created_at DESC, t.id DESC
                    LIMIT $2
                    "#,
                )
                .bind(email)
                .bind(limit + 1)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut entries: Vec<TimelineEntry> = rows.iter().map(row_to_entry).collect();
        let next_cursor = if entries.len() as i64 > limit {
            entries.truncate(limit as usize);
            entries
                .last()
                .map(|e| Cursor::new(e.created_at, e.id.to_string()).encode())
        } else {
            None
        };

        Ok(TimelinePage { entries, next_cursor })
    }
}

