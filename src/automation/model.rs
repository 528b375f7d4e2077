use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "automation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AutomationStatus {
    Draft,
    Live,
    Paused,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[sqlx(type_name = "contact_automation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContactAutomationStatus {
    Active,
    Exited,
    Failed,
}

/// One node in an automation's graph (spec §3). The `nodes` map on
/// `Automation` is keyed by node id; `root_node_id` names the entry point.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Wait {
        #[serde(flatten)]
        until: WaitUntil,
    },
    Send {
        template_id: Uuid,
        channel_options: Option<serde_json::Value>,
        next: String,
    },
    Condition {
        predicate: serde_json::Value,
        true_branch: String,
        false_branch: String,
    },
    Branch {
        /// (node_id, weight) pairs; a contact is routed by
        /// `hash(email + automation_id) mod Σweights`.
        branches: Vec<(String, u32)>,
    },
    Exit {
        reason: String,
    },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum WaitUntil {
    Duration { duration_seconds: i64, next: String },
    Timestamp { at: DateTime<Utc>, next: String },
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TriggerConfig {
    pub entity_type: String,
    pub operation: String,
    pub kind: Option<String>,
}

/// A graph definition bound to a workspace (spec §3, §4.3, §4.4).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Automation {
    pub id: Uuid,
    pub workspace_id: String,
    pub name: String,
    pub status: AutomationStatus,
    pub list_id: Option<Uuid>,
    pub trigger_config: Option<TriggerConfig>,
    pub trigger_sql: Option<String>,
    pub root_node_id: String,
    pub nodes: HashMap<String, Node>,
    pub stats: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Per-contact instance of an automation walk (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContactAutomation {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub contact_email: String,
    pub current_node_id: String,
    pub status: ContactAutomationStatus,
    pub exit_reason: Option<String>,
    pub entered_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub context: serde_json::Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_error: Option<String>,
    pub last_retry_at: Option<DateTime<Utc>>,
}

impl ContactAutomation {
    pub fn enroll(automation_id: Uuid, contact_email: impl Into<String>, root_node_id: impl Into<String>, initial_context: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            automation_id,
            contact_email: contact_email.into(),
            current_node_id: root_node_id.into(),
            status: ContactAutomationStatus::Active,
            exit_reason: None,
            entered_at: Utc::now(),
            scheduled_at: Some(Utc::now()),
            context: initial_context,
            retry_count: 0,
            max_retries: 3,
            last_error: None,
            last_retry_at: None,
        }
    }
}

/// Append-only audit row per node entered (spec §3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NodeExecution {
    pub id: Uuid,
    pub contact_automation_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub action: String,
    pub entered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

/// Bound on synchronous node transitions processed in a single tick
/// (spec §4.3) — prevents a cycle of `condition` nodes from starving the
/// scheduler of a tick slot.
pub const MAX_SYNCHRONOUS_TRANSITIONS: u32 = 16;
