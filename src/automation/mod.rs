mod model;
mod runtime;
mod store;
mod trigger;

pub use model::{
    Automation, AutomationStatus, ContactAutomation, ContactAutomationStatus, Node, NodeExecution,
    TriggerConfig, WaitUntil, MAX_SYNCHRONOUS_TRANSITIONS,
};
pub use runtime::{AutomationRuntime, AutomationRuntimeConfig};
pub use store::{AutomationStore, PgAutomationStore};
pub use trigger::{generate as generate_trigger_sql, TriggerSql};
