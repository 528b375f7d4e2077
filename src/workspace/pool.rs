use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use tokio::sync::RwLock;

use crate::configuration::DatabaseSettings;
use crate::domain::WorkspaceId;
use crate::error::{CoreError, CoreResult};

use super::store::WorkspaceStore;

/// The only way to obtain a DB handle for a workspace (spec §5). Callers
/// never cache connections themselves; this maintains one bounded `PgPool`
/// per workspace id behind a shared lock, building it lazily on first use
/// from the workspace's registered database name.
#[derive(Clone)]
pub struct WorkspaceConnectionPool {
    template: DatabaseSettings,
    workspaces: Arc<dyn WorkspaceStore>,
    pools: Arc<RwLock<HashMap<WorkspaceId, PgPool>>>,
}

impl WorkspaceConnectionPool {
    pub fn new(template: DatabaseSettings, workspaces: Arc<dyn WorkspaceStore>) -> Self {
        Self {
            template,
            workspaces,
            pools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[tracing::instrument(name = "resolve workspace pool", skip(self), fields(workspace_id = %id))]
    pub async fn get(&self, id: &WorkspaceId) -> CoreResult<PgPool> {
        if let Some(pool) = self.pools.read().await.get(id) {
            return Ok(pool.clone());
        }

        let workspace = self.workspaces.get(id).await?;
        let options = self.template.with_workspace_db(&workspace.database_name());
        let pool = PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_secs(2))
            .connect_lazy_with(options);

        let mut pools = self.pools.write().await;
        // Another caller may have raced us to build the same pool; keep
        // whichever won so we never leak a duplicate.
        let pool = pools.entry(id.clone()).or_insert(pool).clone();
        Ok(pool)
    }

    /// Drops the cached pool for a workspace, e.g. after the workspace's
    /// database is dropped during `delete-workspace`.
    pub async fn evict(&self, id: &WorkspaceId) {
        self.pools.write().await.remove(id);
    }

    pub async fn all_workspace_ids(&self) -> CoreResult<Vec<WorkspaceId>> {
        Ok(self
            .workspaces
            .list()
            .await?
            .into_iter()
            .map(|w| w.id)
            .collect())
    }
}

/// Returns a lazily-connecting pool against the system database (tasks,
/// workspaces, settings). Never pooled per-workspace — there is only one.
pub fn system_connection_pool(settings: &DatabaseSettings) -> PgPool {
    PgPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(2))
        .connect_lazy_with(settings.with_db())
}

/// Creates a workspace's logical database. Idempotent: an existing database
/// with the same name is left untouched rather than treated as an error,
/// since `create-workspace` itself already rejects duplicate ids.
pub async fn provision_database(settings: &DatabaseSettings, database_name: &str) -> CoreResult<()> {
    let mut conn = PgConnection::connect_with(&settings.without_db())
        .await
        .map_err(CoreError::Database)?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
        .bind(database_name)
        .fetch_one(&mut conn)
        .await
        .map_err(CoreError::Database)?;

    if !exists {
        sqlx::query(&format!(r#"CREATE DATABASE "{database_name}""#))
            .execute(&mut conn)
            .await
            .map_err(CoreError::Database)?;
    }

    Ok(())
}

/// Drops a workspace's logical database, terminating any connections to it
/// first (Postgres refuses `DROP DATABASE` while sessions are attached).
pub async fn drop_database(settings: &DatabaseSettings, database_name: &str) -> CoreResult<()> {
    let mut conn = PgConnection::connect_with(&settings.without_db())
        .await
        .map_err(CoreError::Database)?;

    sqlx::query(
        r#"
        SELECT pg_terminate_backend(pid)
        FROM pg_stat_activity
        WHERE datname = $1 AND pid <> pg_backend_pid()
        "#,
    )
    .bind(database_name)
    .execute(&mut conn)
    .await
    .map_err(CoreError::Database)?;

    sqlx::query(&format!(r#"DROP DATABASE IF EXISTS "{database_name}""#))
        .execute(&mut conn)
        .await
        .map_err(CoreError::Database)?;

    Ok(())
}
