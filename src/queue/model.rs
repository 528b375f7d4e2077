use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "queue_entry_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Pending,
    Processing,
    Failed,
}

/// Caller-supplied default for priority when an entry omits one (spec §4.2).
pub const MARKETING_DEFAULT_PRIORITY: i16 = 100;
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// One outbound email waiting to be rendered and handed to a provider.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub workspace_id: String,
    pub status: QueueEntryStatus,
    pub priority: i16,
    pub to_address: String,
    pub integration_id: Option<Uuid>,
    pub provider_kind: Option<String>,
    pub template_id: Option<Uuid>,
    pub template_data: serde_json::Value,
    pub source_type: String,
    pub source_id: Uuid,
    pub client_message_id: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Fills the defaults spec §4.2 requires of `Enqueue`: id, status,
    /// priority, max_attempts, timestamps. Call sites only need to supply
    /// the addressing/content fields.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        workspace_id: impl Into<String>,
        to_address: impl Into<String>,
        template_id: Option<Uuid>,
        template_data: serde_json::Value,
        source_type: impl Into<String>,
        source_id: Uuid,
        client_message_id: Option<String>,
        priority: Option<i16>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: workspace_id.into(),
            status: QueueEntryStatus::Pending,
            priority: priority.unwrap_or(MARKETING_DEFAULT_PRIORITY),
            to_address: to_address.into(),
            integration_id: None,
            provider_kind: None,
            template_id,
            template_data,
            source_type: source_type.into(),
            source_id,
            client_message_id,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            last_error: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct QueueStats {
    pub pending: i64,
    pub processing: i64,
    pub failed: i64,
    pub dead_letter: i64,
}

/// Row moved past `max_attempts` or hit by a provider-signalled permanent
/// failure (spec §4.2).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub workspace_id: String,
    pub original_entry_id: Uuid,
    pub to_address: String,
    pub integration_id: Option<Uuid>,
    pub provider_kind: Option<String>,
    pub template_id: Option<Uuid>,
    pub template_data: serde_json::Value,
    pub source_type: String,
    pub source_id: Uuid,
    pub attempts: i32,
    pub final_error: String,
    pub failed_at: DateTime<Utc>,
}
