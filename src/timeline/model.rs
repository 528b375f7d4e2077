use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "timeline_operation", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TimelineOperation {
    Insert,
    Update,
    Delete,
}

/// Append-only event on a contact (spec §3); the trigger surface
/// automations subscribe to (§4.3) and the UI's history feed (§4.5).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TimelineEntry {
    pub id: Uuid,
    pub email: String,
    pub operation: TimelineOperation,
    pub entity_type: String,
    pub kind: Option<String>,
    pub entity_id: Uuid,
    pub changes: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub db_created_at: DateTime<Utc>,
    /// Joined projection of the referenced entity so a single row
    /// suffices to render a UI card (spec §4.5).
    pub entity_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct TimelinePage {
    pub entries: Vec<TimelineEntry>,
    pub next_cursor: Option<String>,
}
