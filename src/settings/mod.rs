use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::error::CoreResult;

/// Reserved key for the scheduler's "last cron run" marker (spec §6). This
/// is the only reserved key this spec defines; the table otherwise holds
/// arbitrary operator-set key/value pairs.
pub const LAST_CRON_RUN_KEY: &str = "last_cron_run";

#[async_trait]
pub trait SettingStore: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> CoreResult<()>;
}

pub struct PgSettingStore {
    pool: PgPool,
}

impl PgSettingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingStore for PgSettingStore {
    #[tracing::instrument(name = "get setting", skip(self))]
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    #[tracing::instrument(name = "set setting", skip(self, value))]
    async fn set(&self, key: &str, value: &str) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = $3
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

pub async fn get_last_cron_run(store: &dyn SettingStore) -> CoreResult<Option<DateTime<Utc>>> {
    match store.get(LAST_CRON_RUN_KEY).await? {
        Some(raw) => Ok(Some(
            DateTime::parse_from_rfc3339(&raw)
                .map_err(|e| crate::error::CoreError::Config(e.to_string()))?
                .with_timezone(&Utc),
        )),
        None => Ok(None),
    }
}

pub async fn set_last_cron_run(store: &dyn SettingStore, at: DateTime<Utc>) -> CoreResult<()> {
    store
        .set(LAST_CRON_RUN_KEY, &at.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true))
        .await
}
