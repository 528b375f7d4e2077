use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One outbound webhook destination an operator has registered (spec §6).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookSubscription {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub secret: String,
    pub event_types: Vec<String>,
    pub custom_event_filters: Option<serde_json::Value>,
    pub enabled: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_delivery_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
}

/// A provider-originated delivery event (bounce, complaint, open, click, …),
/// system-wide per spec §6.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: String,
    pub email_provider_kind: String,
    pub integration_id: Uuid,
    pub recipient_email: String,
    pub message_id: Uuid,
    pub transactional_id: Option<Uuid>,
    pub broadcast_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: String,
    pub bounce_type: Option<String>,
    pub bounce_category: Option<String>,
    pub bounce_diagnostic: Option<String>,
    pub complaint_feedback_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An inbound webhook from a source other than the configured email
/// provider (e.g. a reply-tracking integration), workspace-local.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InboundWebhookEvent {
    pub id: Uuid,
    pub event_type: String,
    pub source: String,
    pub integration_id: Uuid,
    pub recipient_email: String,
    pub message_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: String,
    pub bounce_type: Option<String>,
    pub bounce_category: Option<String>,
    pub bounce_diagnostic: Option<String>,
    pub complaint_feedback_type: Option<String>,
    pub created_at: DateTime<Utc>,
}
