use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::WorkspaceId;
use crate::error::CoreResult;
use crate::queue::{PgQueueStore, QueueEntry, QueueStore};
use crate::workspace::WorkspaceConnectionPool;

use super::model::{
    Automation, ContactAutomation, ContactAutomationStatus, Node, NodeExecution, WaitUntil,
    MAX_SYNCHRONOUS_TRANSITIONS,
};
use super::store::{AutomationStore, PgAutomationStore};

#[derive(Debug, Clone)]
pub struct AutomationRuntimeConfig {
    pub tick_interval: StdDuration,
    pub global_batch_limit: i64,
    pub retry_backoff_base: Duration,
}

impl Default for AutomationRuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_secs(5),
            global_batch_limit: 100,
            retry_backoff_base: Duration::seconds(30),
        }
    }
}

/// Drives the node-graph walk for every workspace's contact-runs (spec
/// §4.3). One instance serves the whole process; it round-robins across
/// workspaces each tick so no single tenant can starve the others.
pub struct AutomationRuntime {
    workspaces: Arc<WorkspaceConnectionPool>,
    config: AutomationRuntimeConfig,
}

impl AutomationRuntime {
    pub fn new(workspaces: Arc<WorkspaceConnectionPool>, config: AutomationRuntimeConfig) -> Self {
        Self { workspaces, config }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = ?e, "automation tick failed");
                    }
                }
            }
        }
    }

    #[tracing::instrument(name = "automation tick", skip(self))]
    async fn tick(&self) -> CoreResult<()> {
        let workspace_ids = self.workspaces.all_workspace_ids().await?;
        if workspace_ids.is_empty() {
            return Ok(());
        }

        let per_workspace = (self.config.global_batch_limit as usize)
            .div_ceil(workspace_ids.len())
            .max(1) as i64;

        let mut claimed_total = 0i64;
        for workspace_id in &workspace_ids {
            if claimed_total >= self.config.global_batch_limit {
                break;
            }
            let remaining = self.config.global_batch_limit - claimed_total;
            let take = per_workspace.min(remaining);

            claimed_total += self.tick_workspace(workspace_id, take).await?;
        }

        Ok(())
    }

    /// Steps one workspace's due contact-runs in isolation. Shares the same
    /// claim/step path as the round-robin background loop; exposed so a
    /// one-off `automation_tick` task can force a tick for a single
    /// workspace without waiting for this workspace's turn in `tick`.
    pub async fn tick_workspace(&self, workspace_id: &WorkspaceId, batch: i64) -> CoreResult<i64> {
        let pool = self.workspaces.get(workspace_id).await?;
        let store = PgAutomationStore::new(pool.clone());
        let queues = PgQueueStore::new(pool);
        let due = store.claim_due_runs(batch).await?;
        let claimed = due.len() as i64;

        for (run, automation) in due {
            self.step(&store, &queues, run, automation).await;
        }

        Ok(claimed)
    }

    async fn step(
        &self,
        store: &PgAutomationStore,
        queues: &PgQueueStore,
        mut run: ContactAutomation,
        automation: Automation,
    ) {
        let mut transitions = 0;
        loop {
            if transitions >= MAX_SYNCHRONOUS_TRANSITIONS {
                run.scheduled_at = Some(Utc::now());
                break;
            }
            transitions += 1;

            let Some(node) = automation.nodes.get(&run.current_node_id) else {
                run.status = ContactAutomationStatus::Failed;
                run.last_error = Some(format!("unknown node: {}", run.current_node_id));
                break;
            };

            let entered_at = Utc::now();
            match self.execute_node(queues, &automation, &run, node).await {
                Ok(NodeOutcome::Wait { next, scheduled_at }) => {
                    record_execution(store, &run, node, entered_at, None).await;
                    run.current_node_id = next;
                    run.scheduled_at = Some(scheduled_at);
                    break;
                }
                Ok(NodeOutcome::Transition { next }) => {
                    record_execution(store, &run, node, entered_at, None).await;
                    run.current_node_id = next;
                    continue;
                }
                Ok(NodeOutcome::Sent { next }) => {
                    record_execution(store, &run, node, entered_at, None).await;
                    run.current_node_id = next;
                    run.scheduled_at = Some(Utc::now());
                    break;
                }
                Ok(NodeOutcome::Exit { reason }) => {
                    record_execution(store, &run, node, entered_at, None).await;
                    run.status = ContactAutomationStatus::Exited;
                    run.exit_reason = Some(reason);
                    run.scheduled_at = None;
                    break;
                }
                Err(e) => {
                    record_execution(store, &run, node, entered_at, Some(e.to_string())).await;
                    run.retry_count += 1;
                    run.last_error = Some(e.to_string());
                    run.last_retry_at = Some(Utc::now());
                    if run.retry_count < run.max_retries {
                        run.scheduled_at = Some(Utc::now() + self.config.retry_backoff_base);
                    } else {
                        run.status = ContactAutomationStatus::Failed;
                        run.scheduled_at = None;
                    }
                    break;
                }
            }
        }

        if let Err(e) = store.save_run(&run).await {
            tracing::error!(error = ?e, run_id = %run.id, "failed to persist contact-run step");
        }
    }

    async fn execute_node(
        &self,
        queues: &PgQueueStore,
        automation: &Automation,
        run: &ContactAutomation,
        node: &Node,
    ) -> anyhow::Result<NodeOutcome> {
        match node {
            Node::Wait { until } => {
                let (scheduled_at, next) = match until {
                    WaitUntil::Duration { duration_seconds, next } => {
                        (Utc::now() + Duration::seconds(*duration_seconds), next.clone())
                    }
                    WaitUntil::Timestamp { at, next } => (*at, next.clone()),
                };
                Ok(NodeOutcome::Wait { next, scheduled_at })
            }
            Node::Condition { predicate, true_branch, false_branch } => {
                let matched = evaluate_predicate(predicate, &run.context);
                Ok(NodeOutcome::Transition {
                    next: if matched { true_branch.clone() } else { false_branch.clone() },
                })
            }
            Node::Branch { branches } => {
                let total: u32 = branches.iter().map(|(_, w)| w).sum();
                if total == 0 {
                    anyhow::bail!("branch node has zero total weight");
                }
                let bucket = deterministic_bucket(&run.contact_email, automation.id, total);
                let mut acc = 0u32;
                for (node_id, weight) in branches {
                    acc += weight;
                    if bucket < acc {
                        return Ok(NodeOutcome::Transition { next: node_id.clone() });
                    }
                }
                anyhow::bail!("branch selection fell through (weights inconsistent)")
            }
            Node::Send { template_id, channel_options, next } => {
                let client_message_id = deterministic_message_id(automation.id, &run.contact_email, &run.current_node_id, run.entered_at);
                let mut entry = QueueEntry::new(
                    automation.workspace_id.clone(),
                    run.contact_email.clone(),
                    Some(*template_id),
                    run.context.clone(),
                    "automation",
                    automation.id,
                    Some(client_message_id),
                    None,
                );
                if let Some(opts) = channel_options {
                    entry.template_data = opts.clone();
                }
                queues.enqueue(&automation.workspace_id, vec![entry]).await?;
                Ok(NodeOutcome::Sent { next: next.clone() })
            }
            Node::Exit { reason } => Ok(NodeOutcome::Exit { reason: reason.clone() }),
        }
    }
}

enum NodeOutcome {
    Wait { next: String, scheduled_at: DateTime<Utc> },
    Transition { next: String },
    Sent { next: String },
    Exit { reason: String },
}

async fn record_execution(
    store: &PgAutomationStore,
    run: &ContactAutomation,
    node: &Node,
    entered_at: DateTime<Utc>,
    error: Option<String>,
) {
    let completed_at = Utc::now();
    let execution = NodeExecution {
        id: Uuid::new_v4(),
        contact_automation_id: run.id,
        node_id: run.current_node_id.clone(),
        node_type: node_type_name(node).to_string(),
        action: "step".to_string(),
        entered_at,
        completed_at: Some(completed_at),
        duration_ms: Some((completed_at - entered_at).num_milliseconds()),
        output: serde_json::Value::Null,
        error,
    };
    if let Err(e) = store.append_node_execution(execution).await {
        tracing::error!(error = ?e, run_id = %run.id, "failed to append node execution");
    }
}

fn node_type_name(node: &Node) -> &'static str {
    match node {
        Node::Wait { .. } => "wait",
        Node::Send { .. } => "send",
        Node::Condition { .. } => "condition",
        Node::Branch { .. } => "branch",
        Node::Exit { .. } => "exit",
    }
}

/// Predicate evaluation is intentionally minimal: a JSON object of
/// `{field: expected_value}` pairs, all of which must match the run's
/// context. Richer expression support is out of scope here.
fn evaluate_predicate(predicate: &serde_json::Value, context: &serde_json::Value) -> bool {
    let (Some(predicate), Some(context)) = (predicate.as_object(), context.as_object()) else {
        return false;
    };
    predicate.iter().all(|(k, v)| context.get(k) == Some(v))
}

fn deterministic_bucket(email: &str, automation_id: Uuid, modulus: u32) -> u32 {
    let mut hasher = DefaultHasher::new();
    email.hash(&mut hasher);
    automation_id.hash(&mut hasher);
    (hasher.finish() % modulus as u64) as u32
}

fn deterministic_message_id(automation_id: Uuid, email: &str, node_id: &str, entered_at: DateTime<Utc>) -> String {
    let mut hasher = DefaultHasher::new();
    automation_id.hash(&mut hasher);
    email.hash(&mut hasher);
    node_id.hash(&mut hasher);
    entered_at.timestamp_nanos_opt().unwrap_or_default().hash(&mut hasher);
    format!("automation-{:x}", hasher.finish())
}
