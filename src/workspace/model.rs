use chrono::{DateTime, Utc};

use crate::domain::WorkspaceId;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub name: String,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workspace {
    pub fn new(id: WorkspaceId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: name.into(),
            settings: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    /// The workspace's logical database name, derivable from its id unless
    /// overridden in `settings.database_name`.
    pub fn database_name(&self) -> String {
        self.settings
            .get("database_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("workspace_{}", self.id.as_ref()))
    }
}
