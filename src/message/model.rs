use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MessageEvent {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
    Unsubscribed,
}

/// Record of one outbound send and its lifecycle (spec §3, §6). `id`
/// doubles as the `client_message_id` assigned at enqueue time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MessageHistory {
    pub id: Uuid,
    pub external_id: Option<String>,
    pub contact_email: String,
    pub broadcast_id: Option<Uuid>,
    pub list_ids: Vec<String>,
    pub template_id: Option<Uuid>,
    pub template_version: Option<i32>,
    pub channel: String,
    pub status_info: Option<String>,
    pub message_data: serde_json::Value,
    pub channel_options: Option<serde_json::Value>,
    pub attachments: serde_json::Value,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub complained_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MessageHistory {
    /// Built by the queue engine right before `MarkAsSent` (spec §4.2).
    pub fn sent(
        workspace_id: impl Into<String>,
        contact_email: impl Into<String>,
        source_type: String,
        source_id: Uuid,
        external_id: String,
    ) -> Self {
        // workspace_id is only needed by the store to address the right
        // logical database; the row itself doesn't carry it as a column.
        let _ = workspace_id.into();
        let now = Utc::now();
        let broadcast_id = if source_type == "broadcast" { Some(source_id) } else { None };
        Self {
            id: Uuid::new_v4(),
            external_id: Some(external_id),
            contact_email: contact_email.into(),
            broadcast_id,
            list_ids: Vec::new(),
            template_id: None,
            template_version: None,
            channel: "email".to_string(),
            status_info: None,
            message_data: serde_json::Value::Null,
            channel_options: None,
            attachments: serde_json::Value::Array(vec![]),
            sent_at: now,
            delivered_at: None,
            failed_at: None,
            opened_at: None,
            clicked_at: None,
            bounced_at: None,
            complained_at: None,
            unsubscribed_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
