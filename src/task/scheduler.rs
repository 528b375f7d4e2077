use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::CoreResult;

use super::handler::HandlerRegistry;
use super::model::{HandlerOutcome, Task, TaskFilter};
use super::store::TaskStore;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: StdDuration,
    pub claim_batch_size: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_secs(1),
            claim_batch_size: 32,
        }
    }
}

/// Process-wide task scheduler: polls the `tasks` table for ready rows
/// and dispatches each to the handler registered for its `task_type`
/// (spec §4.1). Any number of these can run concurrently against the
/// same database — `claim_batch`'s `FOR UPDATE SKIP LOCKED` is the only
/// coordination mechanism, there is no in-process leader election.
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    handlers: HandlerRegistry,
    config: SchedulerConfig,
}

impl TaskScheduler {
    pub fn new(store: Arc<dyn TaskStore>, handlers: HandlerRegistry, config: SchedulerConfig) -> Self {
        Self {
            store,
            handlers,
            config,
        }
    }

    pub async fn submit(&self, task: Task) -> CoreResult<Task> {
        self.store.submit(task).await
    }

    pub async fn get(&self, workspace_id: &str, id: Uuid) -> CoreResult<Task> {
        self.store.get(workspace_id, id).await
    }

    pub async fn list(&self, workspace_id: &str, filter: &TaskFilter) -> CoreResult<(Vec<Task>, i64)> {
        self.store.list(workspace_id, filter).await
    }

    pub async fn cancel(&self, workspace_id: &str, id: Uuid) -> CoreResult<()> {
        self.store.cancel(workspace_id, id).await
    }

    /// Drives the claim/dispatch loop until `cancel` fires. Each claimed
    /// task runs on its own tokio task so a slow handler never delays the
    /// next tick's claim.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("scheduler received shutdown signal, draining in-flight tasks");
                    break;
                }
                _ = ticker.tick() => {
                    self.dispatch_ready(&cancel, &mut in_flight).await;
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            }
        }

        while in_flight.join_next().await.is_some() {}
    }

    async fn dispatch_ready(&self, cancel: &CancellationToken, in_flight: &mut JoinSet<()>) {
        let claimed = match self.store.claim_batch(self.config.claim_batch_size).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::error!(error = ?e, "failed to claim task batch");
                return;
            }
        };

        for task in claimed {
            let Some(handler) = self.handlers.get(&task.task_type) else {
                tracing::warn!(task_type = %task.task_type, task_id = %task.id, "no handler registered for task type");
                let _ = self
                    .store
                    .mark_failed(task.id, "no handler registered for task type")
                    .await;
                continue;
            };

            let store = self.store.clone();
            let child_cancel = cancel.child_token();
            let span = tracing::info_span!("run task", task_id = %task.id, task_type = %task.task_type);

            in_flight.spawn(
                async move {
                    let outcome = match AssertUnwindSafe(handler.handle(child_cancel, task.clone()))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(panic) => {
                            let message = panic_message(&panic);
                            tracing::error!(task_id = %task.id, panic = %message, "task handler panicked");
                            HandlerOutcome::Fail {
                                error: anyhow::anyhow!("handler panicked: {message}"),
                            }
                        }
                    };
                    if let Err(e) = apply_outcome(store.as_ref(), &task, outcome).await {
                        tracing::error!(error = ?e, task_id = %task.id, "failed to persist task outcome");
                    }
                }
                .instrument(span),
            );
        }
    }
}

async fn apply_outcome(
    store: &dyn TaskStore,
    task: &Task,
    outcome: HandlerOutcome,
) -> CoreResult<()> {
    match outcome {
        HandlerOutcome::Progress { progress, state } => {
            store.save_progress(task.id, progress, state).await?;
        }
        HandlerOutcome::Done => {
            store.mark_done(task.id).await?;
        }
        HandlerOutcome::Pause { next_run_at, state } => {
            store
                .mark_paused(task.id, next_run_at, None, Some(state))
                .await?;
        }
        HandlerOutcome::Fail { error } => {
            store.mark_failed(task.id, &error.to_string()).await?;
        }
    }
    Ok(())
}

/// Extracts a human-readable message from a caught panic payload, which is
/// almost always a `&'static str` or `String` (the two types `panic!`/
/// `unwrap`/`expect` produce) but is typed `Box<dyn Any>` regardless.
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
