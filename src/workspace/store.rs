use async_trait::async_trait;
use sqlx::{PgPool, Row};

use crate::domain::WorkspaceId;
use crate::error::{CoreError, CoreResult};

use super::model::Workspace;

/// System-DB-backed registry of workspaces. Construction and destruction
/// are explicit administrative operations (spec §3); this trait covers
/// only the registry row, not the per-workspace database itself (that is
/// `WorkspaceConnectionPool`'s job, see `pool.rs`).
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn create(&self, workspace: Workspace) -> CoreResult<Workspace>;
    async fn get(&self, id: &WorkspaceId) -> CoreResult<Workspace>;
    async fn list(&self) -> CoreResult<Vec<Workspace>>;
    async fn delete(&self, id: &WorkspaceId) -> CoreResult<()>;
}

pub struct PgWorkspaceStore {
    pool: PgPool,
}

impl PgWorkspaceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_workspace(row: sqlx::postgres::PgRow) -> CoreResult<Workspace> {
    use sqlx::Row as _;
    Ok(Workspace {
        id: WorkspaceId::parse(row.try_get::<String, _>("id")?)
            .map_err(CoreError::Config)?,
        name: row.try_get("name")?,
        settings: row.try_get("settings")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl WorkspaceStore for PgWorkspaceStore {
    #[tracing::instrument(name = "create workspace", skip(self, workspace), fields(workspace_id = %workspace.id))]
    async fn create(&self, workspace: Workspace) -> CoreResult<Workspace> {
        let row = sqlx::query(
            r#"
            INSERT INTO workspaces (id, name, settings, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, settings, created_at, updated_at
            "#,
        )
        .bind(workspace.id.as_ref())
        .bind(&workspace.name)
        .bind(&workspace.settings)
        .bind(workspace.created_at)
        .bind(workspace.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::from_sqlx("workspace", workspace.id.to_string(), e))?;

        row_to_workspace(row)
    }

    #[tracing::instrument(name = "get workspace", skip(self), fields(workspace_id = %id))]
    async fn get(&self, id: &WorkspaceId) -> CoreResult<Workspace> {
        let row = sqlx::query(
            r#"
            SELECT id, name, settings, created_at, updated_at
            FROM workspaces
            WHERE id = $1
            "#,
        )
        .bind(id.as_ref())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::not_found("workspace", id.to_string()))?;

        row_to_workspace(row)
    }

    #[tracing::instrument(name = "list workspaces", skip(self))]
    async fn list(&self) -> CoreResult<Vec<Workspace>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, settings, created_at, updated_at
            FROM workspaces
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_workspace).collect()
    }

    #[tracing::instrument(name = "delete workspace", skip(self), fields(workspace_id = %id))]
    async fn delete(&self, id: &WorkspaceId) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM workspaces WHERE id = $1")
            .bind(id.as_ref())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("workspace", id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    // Exercised against a live Postgres instance in tests/workspace_store.rs;
    // row mapping itself has no pure-logic surface worth unit testing here.
}
