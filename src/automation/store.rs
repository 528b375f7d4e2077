use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::model::{Automation, AutomationStatus, ContactAutomation, Node, NodeExecution, TriggerConfig};

#[async_trait]
pub trait AutomationStore: Send + Sync {
    async fn create(&self, automation: Automation) -> CoreResult<Automation>;
    async fn get(&self, id: Uuid, include_deleted: bool) -> CoreResult<Automation>;
    async fn set_status(&self, id: Uuid, status: AutomationStatus) -> CoreResult<()>;
    async fn set_trigger_sql(&self, id: Uuid, trigger_sql: &str) -> CoreResult<()>;
    /// Transitions an automation to `live`. When it has a `trigger_config`
    /// this installs the generated trigger/function pair (drop-then-create,
    /// so re-activation is idempotent) before flipping the status, wiring
    /// up event-driven enrollment (spec §4.3 path 2, §4.4).
    async fn activate(&self, id: Uuid) -> CoreResult<()>;
    /// Soft-deletes the automation, best-effort drops its generated
    /// trigger/function, and exits every active contact-run (spec §4.3
    /// deletion semantics); returns the number of runs exited.
    async fn soft_delete(&self, id: Uuid) -> CoreResult<u64>;

    async fn enroll(&self, contact_automation: ContactAutomation) -> CoreResult<ContactAutomation>;
    /// Claims up to `limit` due contact-runs for this workspace under
    /// `FOR UPDATE SKIP LOCKED` (spec §4.3). The runtime composes this
    /// per-workspace claim with round-robin fan-out across workspaces.
    async fn claim_due_runs(&self, limit: i64) -> CoreResult<Vec<(ContactAutomation, Automation)>>;
    async fn save_run(&self, run: &ContactAutomation) -> CoreResult<()>;
    async fn append_node_execution(&self, execution: NodeExecution) -> CoreResult<()>;
}

pub struct PgAutomationStore {
    pool: PgPool,
}

impl PgAutomationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_automation(row: &sqlx::postgres::PgRow) -> CoreResult<Automation> {
    let nodes_json: serde_json::Value = row.get("nodes");
    let nodes: HashMap<String, Node> = serde_json::from_value(nodes_json)
        .map_err(|e| CoreError::permanent(anyhow::anyhow!(e)))?;
    let trigger_config: Option<serde_json::Value> = row.get("trigger_config");
    let trigger_config = trigger_config
        .map(serde_json::from_value::<TriggerConfig>)
        .transpose()
        .map_err(|e| CoreError::permanent(anyhow::anyhow!(e)))?;

    Ok(Automation {
        id: row.get("id"),
        workspace_id: row.get("workspace_id"),
        name: row.get("name"),
        status: row.get("status"),
        list_id: row.get("list_id"),
        trigger_config,
        trigger_sql: row.get("trigger_sql"),
        root_node_id: row.get("root_node_id"),
        nodes,
        stats: row.get("stats"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted_at: row.get("deleted_at"),
    })
}

fn row_to_run(row: &sqlx::postgres::PgRow) -> ContactAutomation {
    ContactAutomation {
        id: row.get("id"),
        automation_id: row.get("automation_id"),
        contact_email: row.get("contact_email"),
        current_node_id: row.get("current_node_id"),
        status: row.get("status"),
        exit_reason: row.get("exit_reason"),
        entered_at: row.get("entered_at"),
        scheduled_at: row.get("scheduled_at"),
        context: row.get("context"),
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        last_error: row.get("last_error"),
        last_retry_at: row.get("last_retry_at"),
    }
}

const AUTOMATION_COLUMNS: &str = "id, workspace_id, name, status, list_id, trigger_config, \
    trigger_sql, root_node_id, nodes, stats, created_at, updated_at, deleted_at";

#[async_trait]
impl AutomationStore for PgAutomationStore {
    #[tracing::instrument(name = "create automation", skip(self, automation), fields(automation_id = %automation.id))]
    async fn create(&self, automation: Automation) -> CoreResult<Automation> {
        let nodes_json = serde_json::to_value(&automation.nodes)
            .map_err(|e| CoreError::permanent(anyhow::anyhow!(e)))?;
        let trigger_config_json = automation
            .trigger_config
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| CoreError::permanent(anyhow::anyhow!(e)))?;

        let sql = format!(
            r#"
            INSERT INTO automations (
                id, workspace_id, name, status, list_id, trigger_config, trigger_sql,
                root_node_id, nodes, stats, created_at, updated_at, deleted_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {AUTOMATION_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(automation.id)
            .bind(&automation.workspace_id)
            .bind(&automation.name)
            .bind(automation.status)
            .bind(automation.list_id)
            .bind(trigger_config_json)
            .bind(&automation.trigger_sql)
            .bind(&automation.root_node_id)
            .bind(nodes_json)
            .bind(&automation.stats)
            .bind(automation.created_at)
            .bind(automation.updated_at)
            .bind(automation.deleted_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::from_sqlx("automation", automation.id.to_string(), e))?;

        row_to_automation(&row)
    }

    #[tracing::instrument(name = "get automation", skip(self), fields(automation_id = %id))]
    async fn get(&self, id: Uuid, include_deleted: bool) -> CoreResult<Automation> {
        let sql = if include_deleted {
            format!("SELECT {AUTOMATION_COLUMNS} FROM automations WHERE id = $1")
        } else {
            format!("SELECT {AUTOMATION_COLUMNS} FROM automations WHERE id = $1 AND deleted_at IS NULL")
        };
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("automation", id.to_string()))?;
        row_to_automation(&row)
    }

    #[tracing::instrument(name = "set automation status", skip(self), fields(automation_id = %id, status = ?status))]
    async fn set_status(&self, id: Uuid, status: AutomationStatus) -> CoreResult<()> {
        sqlx::query("UPDATE automations SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "set automation trigger sql", skip(self, trigger_sql), fields(automation_id = %id))]
    async fn set_trigger_sql(&self, id: Uuid, trigger_sql: &str) -> CoreResult<()> {
        sqlx::query("UPDATE automations SET trigger_sql = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(trigger_sql)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(name = "activate automation", skip(self), fields(automation_id = %id))]
    async fn activate(&self, id: Uuid) -> CoreResult<()> {
        let automation = self.get(id, false).await?;

        if let Some(trigger_config) = &automation.trigger_config {
            let trigger_sql = super::trigger::generate(id, &automation.root_node_id, trigger_config);

            let mut tx = self.pool.begin().await?;
            sqlx::query(&trigger_sql.drop_trigger).execute(&mut *tx).await?;
            sqlx::query(&trigger_sql.drop_function).execute(&mut *tx).await?;
            sqlx::query(&trigger_sql.create_function).execute(&mut *tx).await?;
            sqlx::query(&trigger_sql.create_trigger).execute(&mut *tx).await?;
            sqlx::query("UPDATE automations SET trigger_sql = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(format!(
                    "{}\n{}\n{}\n{}",
                    trigger_sql.drop_trigger, trigger_sql.drop_function, trigger_sql.create_function, trigger_sql.create_trigger
                ))
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
        }

        self.set_status(id, AutomationStatus::Live).await
    }

    #[tracing::instrument(name = "soft delete automation", skip(self), fields(automation_id = %id))]
    async fn soft_delete(&self, id: Uuid) -> CoreResult<u64> {
        let (drop_trigger, drop_function) = super::trigger::drop_statements(id);
        if let Err(e) = sqlx::query(&drop_trigger).execute(&self.pool).await {
            tracing::warn!(error = ?e, automation_id = %id, "failed to drop automation trigger (best effort)");
        }
        if let Err(e) = sqlx::query(&drop_function).execute(&self.pool).await {
            tracing::warn!(error = ?e, automation_id = %id, "failed to drop automation trigger function (best effort)");
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE automations SET deleted_at = NOW(), updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query(
            r#"
            UPDATE contact_automations
            SET status = 'exited', exit_reason = 'automation_deleted', scheduled_at = NULL
            WHERE automation_id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }

    #[tracing::instrument(name = "enroll contact automation", skip(self, contact_automation), fields(automation_id = %contact_automation.automation_id, contact_email = %contact_automation.contact_email))]
    async fn enroll(&self, contact_automation: ContactAutomation) -> CoreResult<ContactAutomation> {
        let row = sqlx::query(
            r#"
            INSERT INTO contact_automations (
                id, automation_id, contact_email, current_node_id, status, exit_reason,
                entered_at, scheduled_at, context, retry_count, max_retries, last_error, last_retry_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT DO NOTHING
            RETURNING id, automation_id, contact_email, current_node_id, status, exit_reason,
                      entered_at, scheduled_at, context, retry_count, max_retries, last_error, last_retry_at
            "#,
        )
        .bind(contact_automation.id)
        .bind(contact_automation.automation_id)
        .bind(&contact_automation.contact_email)
        .bind(&contact_automation.current_node_id)
        .bind(contact_automation.status)
        .bind(&contact_automation.exit_reason)
        .bind(contact_automation.entered_at)
        .bind(contact_automation.scheduled_at)
        .bind(&contact_automation.context)
        .bind(contact_automation.retry_count)
        .bind(contact_automation.max_retries)
        .bind(&contact_automation.last_error)
        .bind(contact_automation.last_retry_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| CoreError::conflict("contact_automation", contact_automation.id.to_string()))?;

        Ok(row_to_run(&row))
    }

    #[tracing::instrument(name = "claim due contact runs", skip(self))]
    async fn claim_due_runs(&self, limit: i64) -> CoreResult<Vec<(ContactAutomation, Automation)>> {
        let rows = sqlx::query(
            r#"
            WITH due AS (
                SELECT ca.id
                FROM contact_automations ca
                JOIN automations a ON a.id = ca.automation_id
                WHERE ca.status = 'active'
                  AND ca.scheduled_at <= NOW()
                  AND a.status = 'live'
                  AND a.deleted_at IS NULL
                ORDER BY ca.scheduled_at ASC
                LIMIT $1
                FOR UPDATE OF ca SKIP LOCKED
            )
            UPDATE contact_automations ca
            SET scheduled_at = NULL
            FROM due
            WHERE ca.id = due.id
            RETURNING ca.id, ca.automation_id, ca.contact_email, ca.current_node_id, ca.status,
                      ca.exit_reason, ca.entered_at, ca.scheduled_at, ca.context, ca.retry_count,
                      ca.max_retries, ca.last_error, ca.last_retry_at
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let run = row_to_run(row);
            let automation = self.get(run.automation_id, false).await?;
            out.push((run, automation));
        }
        Ok(out)
    }

    #[tracing::instrument(name = "save contact run", skip(self, run), fields(run_id = %run.id))]
    async fn save_run(&self, run: &ContactAutomation) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE contact_automations
            SET current_node_id = $2, status = $3, exit_reason = $4, scheduled_at = $5,
                context = $6, retry_count = $7, last_error = $8, last_retry_at = $9
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(&run.current_node_id)
        .bind(run.status)
        .bind(&run.exit_reason)
        .bind(run.scheduled_at)
        .bind(&run.context)
        .bind(run.retry_count)
        .bind(&run.last_error)
        .bind(run.last_retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(name = "append node execution", skip(self, execution), fields(contact_automation_id = %execution.contact_automation_id, node_id = %execution.node_id))]
    async fn append_node_execution(&self, execution: NodeExecution) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_node_executions (
                id, contact_automation_id, node_id, node_type, action, entered_at,
                completed_at, duration_ms, output, error
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(execution.id)
        .bind(execution.contact_automation_id)
        .bind(&execution.node_id)
        .bind(&execution.node_type)
        .bind(&execution.action)
        .bind(execution.entered_at)
        .bind(execution.completed_at)
        .bind(execution.duration_ms)
        .bind(&execution.output)
        .bind(&execution.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

