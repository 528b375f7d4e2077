use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::model::{MessageEvent, MessageHistory};

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn record_sent(&self, message: MessageHistory) -> CoreResult<()>;
    async fn get(&self, id: Uuid) -> CoreResult<MessageHistory>;
    /// Applies a lifecycle event under set-once-monotonic semantics (spec
    /// §3 invariant, §8 property 3): a slot that is already non-null is
    /// left untouched. Setting `Clicked` also sets `Opened` if unset.
    async fn record_event(&self, id: Uuid, event: MessageEvent, at: DateTime<Utc>) -> CoreResult<()>;
}

pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct MessageRow {
    id: Uuid,
    external_id: Option<String>,
    contact_email: String,
    broadcast_id: Option<Uuid>,
    list_ids: Vec<String>,
    template_id: Option<Uuid>,
    template_version: Option<i32>,
    channel: String,
    status_info: Option<String>,
    message_data: serde_json::Value,
    channel_options: Option<serde_json::Value>,
    attachments: serde_json::Value,
    sent_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
    clicked_at: Option<DateTime<Utc>>,
    bounced_at: Option<DateTime<Utc>>,
    complained_at: Option<DateTime<Utc>>,
    unsubscribed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MessageRow> for MessageHistory {
    fn from(r: MessageRow) -> Self {
        MessageHistory {
            id: r.id,
            external_id: r.external_id,
            contact_email: r.contact_email,
            broadcast_id: r.broadcast_id,
            list_ids: r.list_ids,
            template_id: r.template_id,
            template_version: r.template_version,
            channel: r.channel,
            status_info: r.status_info,
            message_data: r.message_data,
            channel_options: r.channel_options,
            attachments: r.attachments,
            sent_at: r.sent_at,
            delivered_at: r.delivered_at,
            failed_at: r.failed_at,
            opened_at: r.opened_at,
            clicked_at: r.clicked_at,
            bounced_at: r.bounced_at,
            complained_at: r.complained_at,
            unsubscribed_at: r.unsubscribed_at,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, external_id, contact_email, broadcast_id, list_ids, \
    template_id, template_version, channel, status_info, message_data, channel_options, \
    attachments, sent_at, delivered_at, failed_at, opened_at, clicked_at, bounced_at, \
    complained_at, unsubscribed_at, created_at, updated_at";

fn event_column(event: MessageEvent) -> &'static str {
    match event {
        MessageEvent::Delivered => "delivered_at",
        MessageEvent::Opened => "opened_at",
        MessageEvent::Clicked => "clicked_at",
        MessageEvent::Bounced => "bounced_at",
        MessageEvent::Complained => "complained_at",
        MessageEvent::Unsubscribed => "unsubscribed_at",
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    #[tracing::instrument(name = "record sent message", skip(self, message), fields(message_id = %message.id))]
    async fn record_sent(&self, message: MessageHistory) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message_history (
                id, external_id, contact_email, broadcast_id, list_ids, template_id,
                template_version, channel, status_info, message_data, channel_options,
                attachments, sent_at, delivered_at, failed_at, opened_at, clicked_at,
                bounced_at, complained_at, unsubscribed_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22
            )
            "#,
        )
        .bind(message.id)
        .bind(&message.external_id)
        .bind(&message.contact_email)
        .bind(message.broadcast_id)
        .bind(&message.list_ids)
        .bind(message.template_id)
        .bind(message.template_version)
        .bind(&message.channel)
        .bind(&message.status_info)
        .bind(&message.message_data)
        .bind(&message.channel_options)
        .bind(&message.attachments)
        .bind(message.sent_at)
        .bind(message.delivered_at)
        .bind(message.failed_at)
        .bind(message.opened_at)
        .bind(message.clicked_at)
        .bind(message.bounced_at)
        .bind(message.complained_at)
        .bind(message.unsubscribed_at)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::from_sqlx("message_history", message.id.to_string(), e))?;

        Ok(())
    }

    #[tracing::instrument(name = "get message", skip(self), fields(message_id = %id))]
    async fn get(&self, id: Uuid) -> CoreResult<MessageHistory> {
        let sql = format!("SELECT {MESSAGE_COLUMNS} FROM message_history WHERE id = $1");
        let row: MessageRow = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("message_history", id.to_string()))?;
        Ok(row.into())
    }

    #[tracing::instrument(name = "record message event", skip(self), fields(message_id = %id, event = ?event))]
    async fn record_event(&self, id: Uuid, event: MessageEvent, at: DateTime<Utc>) -> CoreResult<()> {
        let column = event_column(event);

        // COALESCE enforces set-once; clicked_at also backfills opened_at
        // if it is still unset, matching the implication invariant.
        let sql = if matches!(event, MessageEvent::Clicked) {
            format!(
                "UPDATE message_history SET {column} = COALESCE({column}, $2), \
                 opened_at = COALESCE(opened_at, $2), updated_at = NOW() WHERE id = $1"
            )
        } else {
            format!(
                "UPDATE message_history SET {column} = COALESCE({column}, $2), updated_at = NOW() WHERE id = $1"
            )
        };

        let result = sqlx::query(&sql).bind(id).bind(at).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("message_history", id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_columns_cover_every_variant() {
        assert_eq!(event_column(MessageEvent::Delivered), "delivered_at");
        assert_eq!(event_column(MessageEvent::Opened), "opened_at");
        assert_eq!(event_column(MessageEvent::Clicked), "clicked_at");
        assert_eq!(event_column(MessageEvent::Bounced), "bounced_at");
        assert_eq!(event_column(MessageEvent::Complained), "complained_at");
        assert_eq!(event_column(MessageEvent::Unsubscribed), "unsubscribed_at");
    }
}
