use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

use super::model::{Subtask, Task, TaskFilter, TaskStatus};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn submit(&self, task: Task) -> CoreResult<Task>;
    async fn get(&self, workspace_id: &str, id: Uuid) -> CoreResult<Task>;
    async fn list(&self, workspace_id: &str, filter: &TaskFilter) -> CoreResult<(Vec<Task>, i64)>;
    async fn cancel(&self, workspace_id: &str, id: Uuid) -> CoreResult<()>;

    /// Claims up to `batch` ready tasks process-wide (spec §4.1's claim
    /// query has no workspace predicate — it is the scheduler, not a
    /// per-workspace construct). Returns tasks already transitioned to
    /// `running` with a fresh `timeout_after`.
    async fn claim_batch(&self, batch: i64) -> CoreResult<Vec<Task>>;

    /// Succeeds only when the row is still `running` (guards against a
    /// write racing a cancellation or a timeout reclaim).
    async fn save_progress(
        &self,
        id: Uuid,
        progress: i16,
        state: serde_json::Value,
    ) -> CoreResult<bool>;

    async fn mark_done(&self, id: Uuid) -> CoreResult<()>;
    async fn mark_paused(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        progress: Option<i16>,
        state: Option<serde_json::Value>,
    ) -> CoreResult<()>;
    async fn mark_failed(&self, id: Uuid, error: &str) -> CoreResult<()>;

    async fn spawn_subtasks(
        &self,
        parent_task_id: Uuid,
        states: Vec<serde_json::Value>,
    ) -> CoreResult<Vec<Subtask>>;
    async fn update_subtask_progress(
        &self,
        subtask_id: Uuid,
        progress: i16,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> CoreResult<()>;
    /// Recomputes the parent's progress/status from its subtasks (spec
    /// §4.1 subtask rollup, §8 property 2).
    async fn rollup_subtasks(&self, parent_task_id: Uuid) -> CoreResult<()>;
}

pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    workspace_id: String,
    task_type: String,
    status: TaskStatus,
    progress: i16,
    state: serde_json::Value,
    error_message: Option<String>,
    max_runtime: i64,
    max_retries: i32,
    retry_count: i32,
    retry_interval: i64,
    next_run_after: Option<DateTime<Utc>>,
    timeout_after: Option<DateTime<Utc>>,
    last_run_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    broadcast_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<TaskRow> for Task {
    fn from(r: TaskRow) -> Self {
        Task {
            id: r.id,
            workspace_id: r.workspace_id,
            task_type: r.task_type,
            status: r.status,
            progress: r.progress,
            state: r.state,
            error_message: r.error_message,
            max_runtime: r.max_runtime,
            max_retries: r.max_retries,
            retry_count: r.retry_count,
            retry_interval: r.retry_interval,
            next_run_after: r.next_run_after,
            timeout_after: r.timeout_after,
            last_run_at: r.last_run_at,
            completed_at: r.completed_at,
            broadcast_id: r.broadcast_id,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

const TASK_COLUMNS: &str = "id, workspace_id, type AS task_type, status, progress, state, \
    error_message, max_runtime, max_retries, retry_count, retry_interval, next_run_after, \
    timeout_after, last_run_at, completed_at, broadcast_id, created_at, updated_at";

#[async_trait]
impl TaskStore for PgTaskStore {
    #[tracing::instrument(name = "submit task", skip(self, task), fields(workspace_id = %task.workspace_id, task_type = %task.task_type))]
    async fn submit(&self, task: Task) -> CoreResult<Task> {
        let sql = format!(
            r#"
            INSERT INTO tasks (
                id, workspace_id, type, status, progress, state, error_message,
                max_runtime, max_retries, retry_count, retry_interval, next_run_after,
                timeout_after, last_run_at, completed_at, broadcast_id, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18
            )
            RETURNING {TASK_COLUMNS}
            "#
        );

        let row: TaskRow = sqlx::query_as(&sql)
            .bind(task.id)
            .bind(&task.workspace_id)
            .bind(&task.task_type)
            .bind(task.status)
            .bind(task.progress)
            .bind(&task.state)
            .bind(&task.error_message)
            .bind(task.max_runtime)
            .bind(task.max_retries)
            .bind(task.retry_count)
            .bind(task.retry_interval)
            .bind(task.next_run_after)
            .bind(task.timeout_after)
            .bind(task.last_run_at)
            .bind(task.completed_at)
            .bind(task.broadcast_id)
            .bind(task.created_at)
            .bind(task.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CoreError::from_sqlx("task", task.id.to_string(), e))?;

        Ok(row.into())
    }

    #[tracing::instrument(name = "get task", skip(self), fields(workspace_id = %workspace_id, task_id = %id))]
    async fn get(&self, workspace_id: &str, id: Uuid) -> CoreResult<Task> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND workspace_id = $2");
        let row: TaskRow = sqlx::query_as(&sql)
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::not_found("task", id.to_string()))?;
        Ok(row.into())
    }

    #[tracing::instrument(name = "list tasks", skip(self, filter), fields(workspace_id = %workspace_id))]
    async fn list(&self, workspace_id: &str, filter: &TaskFilter) -> CoreResult<(Vec<Task>, i64)> {
        // Built incrementally; all predicates are bound, never interpolated.
        let mut conditions = vec!["workspace_id = $1".to_string()];
        let mut idx = 2;
        if !filter.statuses.is_empty() {
            conditions.push(format!("status = ANY(${idx})"));
            idx += 1;
        }
        if !filter.types.is_empty() {
            conditions.push(format!("type = ANY(${idx})"));
            idx += 1;
        }
        if filter.created_after.is_some() {
            conditions.push(format!("created_at >= ${idx}"));
            idx += 1;
        }
        if filter.created_before.is_some() {
            conditions.push(format!("created_at <= ${idx}"));
            idx += 1;
        }
        let where_clause = conditions.join(" AND ");

        let count_sql = format!("SELECT COUNT(*) AS count FROM tasks WHERE {where_clause}");
        let list_sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE {where_clause} ORDER BY created_at DESC LIMIT ${idx} OFFSET ${}",
            idx + 1
        );

        macro_rules! bind_shared {
            ($q:expr) => {{
                let mut q = $q.bind(workspace_id);
                if !filter.statuses.is_empty() {
                    q = q.bind(&filter.statuses);
                }
                if !filter.types.is_empty() {
                    q = q.bind(&filter.types);
                }
                if let Some(after) = filter.created_after {
                    q = q.bind(after);
                }
                if let Some(before) = filter.created_before {
                    q = q.bind(before);
                }
                q
            }};
        }

        let total: i64 = bind_shared!(sqlx::query(&count_sql))
            .fetch_one(&self.pool)
            .await?
            .get("count");

        let rows: Vec<TaskRow> = bind_shared!(sqlx::query_as(&list_sql))
            .bind(filter.limit)
            .bind(filter.offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((rows.into_iter().map(Task::from).collect(), total))
    }

    #[tracing::instrument(name = "cancel task", skip(self), fields(workspace_id = %workspace_id, task_id = %id))]
    async fn cancel(&self, workspace_id: &str, id: Uuid) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', error_message = 'cancelled', timeout_after = NULL, updated_at = NOW()
            WHERE id = $1 AND workspace_id = $2 AND status != 'completed'
            "#,
        )
        .bind(id)
        .bind(workspace_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("task", id.to_string()));
        }
        Ok(())
    }

    #[tracing::instrument(name = "claim task batch", skip(self))]
    async fn claim_batch(&self, batch: i64) -> CoreResult<Vec<Task>> {
        // CTE mirrors the spec's "select ready rows, SKIP LOCKED, transition
        // in the same transaction" claim protocol (spec §4.1).
        let sql = format!(
            r#"
            WITH ready AS (
                SELECT id
                FROM tasks
                WHERE
                    (status = 'pending' AND (next_run_after IS NULL OR next_run_after <= NOW()))
                    OR (status = 'paused' AND next_run_after <= NOW())
                    OR (status = 'running' AND timeout_after <= NOW())
                ORDER BY next_run_after ASC NULLS FIRST, created_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tasks
            SET status = 'running',
                last_run_at = NOW(),
                timeout_after = NOW() + (tasks.max_runtime || ' seconds')::INTERVAL,
                updated_at = NOW()
            FROM ready
            WHERE tasks.id = ready.id
            RETURNING {TASK_COLUMNS}
            "#
        );

        let rows: Vec<TaskRow> = sqlx::query_as(&sql)
            .bind(batch)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Task::from).collect())
    }

    #[tracing::instrument(name = "save task progress", skip(self, state), fields(task_id = %id))]
    async fn save_progress(
        &self,
        id: Uuid,
        progress: i16,
        state: serde_json::Value,
    ) -> CoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET progress = $2, state = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(progress)
        .bind(state)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(name = "mark task done", skip(self), fields(task_id = %id))]
    async fn mark_done(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', progress = 100, completed_at = NOW(),
                timeout_after = NULL, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(name = "mark task paused", skip(self, state), fields(task_id = %id))]
    async fn mark_paused(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        progress: Option<i16>,
        state: Option<serde_json::Value>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'paused',
                next_run_after = $2,
                retry_count = retry_count + 1,
                progress = COALESCE($3, progress),
                state = COALESCE($4, state),
                timeout_after = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(next_run_at)
        .bind(progress)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(name = "mark task failed", skip(self, error), fields(task_id = %id))]
    async fn mark_failed(&self, id: Uuid, error: &str) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET
                status = CASE WHEN retry_count < max_retries THEN 'pending' ELSE 'failed' END,
                next_run_after = CASE
                    WHEN retry_count < max_retries THEN NOW() + (retry_interval || ' seconds')::INTERVAL
                    ELSE next_run_after
                END,
                retry_count = CASE WHEN retry_count < max_retries THEN retry_count + 1 ELSE retry_count END,
                error_message = $2,
                timeout_after = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[tracing::instrument(name = "spawn subtasks", skip(self, states), fields(parent_task_id = %parent_task_id))]
    async fn spawn_subtasks(
        &self,
        parent_task_id: Uuid,
        states: Vec<serde_json::Value>,
    ) -> CoreResult<Vec<Subtask>> {
        let total = states.len() as i32;
        let mut subtasks = Vec::with_capacity(states.len());
        let mut tx = self.pool.begin().await?;

        for (index, state) in states.into_iter().enumerate() {
            let row = sqlx::query(
                r#"
                INSERT INTO task_subtasks (
                    id, parent_task_id, status, progress, state, error_message,
                    index, total, created_at, updated_at
                ) VALUES ($1, $2, 'pending', 0, $3, NULL, $4, $5, NOW(), NOW())
                RETURNING id, parent_task_id, status, progress, state, error_message,
                          index, total, broadcast_id, created_at, updated_at, started_at,
                          completed_at, timeout_after
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(parent_task_id)
            .bind(&state)
            .bind(index as i32)
            .bind(total)
            .fetch_one(&mut *tx)
            .await?;

            subtasks.push(row_to_subtask(row));
        }

        tx.commit().await?;
        Ok(subtasks)
    }

    #[tracing::instrument(name = "update subtask progress", skip(self, error_message), fields(subtask_id = %subtask_id))]
    async fn update_subtask_progress(
        &self,
        subtask_id: Uuid,
        progress: i16,
        status: TaskStatus,
        error_message: Option<String>,
    ) -> CoreResult<()> {
        let row = sqlx::query(
            r#"
            UPDATE task_subtasks
            SET progress = $2, status = $3, error_message = $4,
                completed_at = CASE WHEN $3 IN ('completed', 'failed') THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING parent_task_id
            "#,
        )
        .bind(subtask_id)
        .bind(progress)
        .bind(status)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await?;

        // Rolling up here, rather than leaving it to the scheduler, means
        // every caller that finishes a subtask gets its parent recomputed —
        // subtasks aren't dispatched through `claim_batch` at all, so there
        // is no other single chokepoint for this.
        if matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            let parent_task_id: Uuid = row.get("parent_task_id");
            self.rollup_subtasks(parent_task_id).await?;
        }
        Ok(())
    }

    #[tracing::instrument(name = "rollup subtasks", skip(self), fields(parent_task_id = %parent_task_id))]
    async fn rollup_subtasks(&self, parent_task_id: Uuid) -> CoreResult<()> {
        let rows = sqlx::query(
            r#"SELECT status, progress FROM task_subtasks WHERE parent_task_id = $1"#,
        )
        .bind(parent_task_id)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(());
        }

        let statuses: Vec<TaskStatus> = rows
            .iter()
            .map(|r| r.get::<TaskStatus, _>("status"))
            .collect();
        let progresses: Vec<i16> = rows.iter().map(|r| r.get::<i16, _>("progress")).collect();

        let mean_progress =
            (progresses.iter().map(|p| *p as i64).sum::<i64>() / progresses.len() as i64) as i16;
        let all_terminal = statuses
            .iter()
            .all(|s| matches!(s, TaskStatus::Completed | TaskStatus::Failed));
        let any_failed = statuses.iter().any(|s| *s == TaskStatus::Failed);
        let all_completed = statuses.iter().all(|s| *s == TaskStatus::Completed);

        if all_completed {
            self.mark_done(parent_task_id).await?;
        } else if all_terminal && any_failed {
            let failed = statuses.iter().filter(|s| **s == TaskStatus::Failed).count();
            self.mark_failed(
                parent_task_id,
                &format!("{} of {} subtasks failed", failed, statuses.len()),
            )
            .await?;
            // mark_failed applies retry semantics; a subtask rollup failure
            // is terminal by definition (spec §4.1), so force it straight
            // to `failed` regardless of the parent's own retry budget.
            sqlx::query("UPDATE tasks SET status = 'failed', retry_count = max_retries WHERE id = $1")
                .bind(parent_task_id)
                .execute(&self.pool)
                .await?;
        } else {
            sqlx::query("UPDATE tasks SET progress = $2, updated_at = NOW() WHERE id = $1")
                .bind(parent_task_id)
                .bind(mean_progress)
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }
}

fn row_to_subtask(row: sqlx::postgres::PgRow) -> Subtask {
    Subtask {
        id: row.get("id"),
        parent_task_id: row.get("parent_task_id"),
        status: row.get("status"),
        progress: row.get("progress"),
        state: row.get("state"),
        error_message: row.get("error_message"),
        index: row.get("index"),
        total: row.get("total"),
        broadcast_id: row.get("broadcast_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        timeout_after: row.get("timeout_after"),
    }
}

/// Exponential backoff helper shared by the queue (§4.2) but also useful
/// for ad-hoc scheduler retries that want jitter rather than a fixed
/// `retry_interval`.
pub fn backoff_with_jitter(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let exp = base
        .checked_mul(2i32.saturating_pow(attempt) as i32)
        .unwrap_or(cap);
    let jitter = Duration::milliseconds(rand::random::<u64>() as i64 % base.num_milliseconds().max(1));
    std::cmp::min(exp + jitter, cap)
}

#[cfg(test)]
mod backoff_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    /// Keeps generated bases/caps within a range that can't overflow the
    /// `checked_mul` above and still exercises the cap.
    #[derive(Debug, Clone, Copy)]
    struct SmallSeconds(i64);

    impl quickcheck::Arbitrary for SmallSeconds {
        fn arbitrary(g: &mut quickcheck::Gen) -> Self {
            SmallSeconds((u8::arbitrary(g) as i64) + 1)
        }
    }

    #[quickcheck]
    fn never_exceeds_the_cap(base: SmallSeconds, attempt: u8, cap: SmallSeconds) -> bool {
        let base = Duration::seconds(base.0);
        let cap = Duration::seconds(cap.0);
        backoff_with_jitter(base, attempt as u32 % 16, cap) <= cap
    }

    #[quickcheck]
    fn never_negative(base: SmallSeconds, attempt: u8, cap: SmallSeconds) -> bool {
        let base = Duration::seconds(base.0);
        let cap = Duration::seconds(cap.0);
        backoff_with_jitter(base, attempt as u32 % 16, cap) >= Duration::zero()
    }
}
