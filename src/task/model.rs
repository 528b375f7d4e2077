use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

/// Durable unit of asynchronous work (spec §3, §4.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub workspace_id: String,
    pub task_type: String,
    pub status: TaskStatus,
    pub progress: i16,
    pub state: serde_json::Value,
    pub error_message: Option<String>,
    pub max_runtime: i64,
    pub max_retries: i32,
    pub retry_count: i32,
    pub retry_interval: i64,
    pub next_run_after: Option<DateTime<Utc>>,
    pub timeout_after: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub broadcast_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        workspace_id: impl Into<String>,
        task_type: impl Into<String>,
        state: serde_json::Value,
        max_runtime: i64,
        max_retries: i32,
        retry_interval: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            task_type: task_type.into(),
            status: TaskStatus::Pending,
            progress: 0,
            state,
            error_message: None,
            max_runtime,
            max_retries,
            retry_count: 0,
            retry_interval,
            next_run_after: None,
            timeout_after: None,
            last_run_at: None,
            completed_at: None,
            broadcast_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Vec<TaskStatus>,
    pub types: Vec<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self {
            limit: 50,
            ..Default::default()
        }
    }
}

/// One sibling row spawned by `Spawn(parent, N)` (spec §4.1). Mirrors
/// `task_subtasks` 1:1.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub parent_task_id: Uuid,
    pub status: TaskStatus,
    pub progress: i16,
    pub state: serde_json::Value,
    pub error_message: Option<String>,
    pub index: i32,
    pub total: i32,
    pub broadcast_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_after: Option<DateTime<Utc>>,
}

/// What a `TaskHandler::handle` call reports back to the scheduler.
pub enum HandlerOutcome {
    Progress { progress: i16, state: serde_json::Value },
    Done,
    Pause { next_run_at: DateTime<Utc>, state: serde_json::Value },
    Fail { error: anyhow::Error },
}
