use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::model::WebhookSubscription;

#[async_trait]
pub trait WebhookSubscriptionStore: Send + Sync {
    async fn create(&self, subscription: WebhookSubscription) -> CoreResult<WebhookSubscription>;
    async fn get(&self, id: Uuid) -> CoreResult<WebhookSubscription>;
    async fn list_enabled_for_event(&self, event_type: &str) -> CoreResult<Vec<WebhookSubscription>>;
    async fn record_delivery(&self, id: Uuid, success: bool) -> CoreResult<()>;
    async fn set_enabled(&self, id: Uuid, enabled: bool) -> CoreResult<()>;
}

pub struct PgWebhookSubscriptionStore {
    pool: PgPool,
}

impl PgWebhookSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const SUBSCRIPTION_COLUMNS: &str = "id, name, url, secret, event_types, custom_event_filters, \
    enabled, description, created_at, updated_at, last_delivery_at, success_count, failure_count";

fn row_to_subscription(row: &sqlx::postgres::PgRow) -> WebhookSubscription {
    WebhookSubscription {
        id: row.get("id"),
        name: row.get("name"),
        url: row.get("url"),
        secret: row.get("secret"),
        event_types: row.get("event_types"),
        custom_event_filters: row.get("custom_event_filters"),
        enabled: row.get("enabled"),
        description: row.get("description"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_delivery_at: row.get("last_delivery_at"),
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
    }
}

#[async_trait]
impl WebhookSubscriptionStore for PgWebhookSubscriptionStore {
    #[tracing::instrument(name = "create webhook subscription", skip(self, subscription), fields(subscription_id = %subscription.id))]
    async fn create(&self, subscription: WebhookSubscription) -> CoreResult<WebhookSubscription> {
        let sql = format!(
            r#"
            INSERT INTO webhook_subscriptions (
                id, name, url, secret, event_types, custom_event_filters, enabled,
                description, created_at, updated_at, last_delivery_at, success_count, failure_count
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(subscription.id)
            .bind(&subscription.name)
            .bind(&subscription.url)
            .bind(&subscription.secret)
            .bind(&subscription.event_types)
            .bind(&subscription.custom_event_filters)
            .bind(subscription.enabled)
            .bind(&subscription.description)
            .bind(subscription.created_at)
            .bind(subscription.updated_at)
            .bind(subscription.last_delivery_at)
            .bind(subscription.success_count)
            .bind(subscription.failure_count)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::from_sqlx("webhook_subscription", subscription.id.to_string(), e))?;
        Ok(row_to_subscription(&row))
    }

    #[tracing::instrument(name = "get webhook subscription", skip(self), fields(subscription_id = %id))]
    async fn get(&self, id: Uuid) -> CoreResult<WebhookSubscription> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("webhook_subscription", id.to_string()))?;
        Ok(row_to_subscription(&row))
    }

    #[tracing::instrument(name = "list webhook subscriptions for event", skip(self), fields(event_type = %event_type))]
    async fn list_enabled_for_event(&self, event_type: &str) -> CoreResult<Vec<WebhookSubscription>> {
        let sql = format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM webhook_subscriptions \
             WHERE enabled = true AND $1 = ANY(event_types)"
        );
        let rows = sqlx::query(&sql).bind(event_type).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(row_to_subscription).collect())
    }

    #[tracing::instrument(name = "record webhook delivery", skip(self), fields(subscription_id = %id, success))]
    async fn record_delivery(&self, id: Uuid, success: bool) -> CoreResult<()> {
        let sql = if success {
            "UPDATE webhook_subscriptions SET success_count = success_count + 1, last_delivery_at = NOW(), updated_at = NOW() WHERE id = $1"
        } else {
            "UPDATE webhook_subscriptions SET failure_count = failure_count + 1, last_delivery_at = NOW(), updated_at = NOW() WHERE id = $1"
        };
        sqlx::query(sql).bind(id).execute(&self.pool).await?;
        Ok(())
    }

    #[tracing::instrument(name = "set webhook subscription enabled", skip(self), fields(subscription_id = %id, enabled))]
    async fn set_enabled(&self, id: Uuid, enabled: bool) -> CoreResult<()> {
        sqlx::query("UPDATE webhook_subscriptions SET enabled = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(enabled)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
