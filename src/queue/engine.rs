use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::model::QueueEntry;
use super::provider::{Envelope, EmailProvider, ProviderError, TemplateRenderer};
use super::store::QueueStore;
use crate::message::{MessageHistory, MessageStore};

#[derive(Debug, Clone)]
pub struct QueueEngineConfig {
    pub tick_interval: StdDuration,
    pub empty_queue_backoff: StdDuration,
    pub batch_size: i64,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for QueueEngineConfig {
    fn default() -> Self {
        Self {
            tick_interval: StdDuration::from_millis(500),
            empty_queue_backoff: StdDuration::from_secs(10),
            batch_size: 10,
            backoff_base: Duration::minutes(5),
            backoff_cap: Duration::hours(1),
        }
    }
}

/// Bounded worker pool over a single workspace's queue (spec §4.2). One
/// instance is spun up per workspace the process currently owns.
pub struct QueueEngine {
    workspace_id: String,
    store: Arc<dyn QueueStore>,
    messages: Arc<dyn MessageStore>,
    provider: Arc<dyn EmailProvider>,
    renderer: Arc<dyn TemplateRenderer>,
    config: QueueEngineConfig,
}

pub enum ExecutionOutcome {
    TaskCompleted,
    EmptyQueue,
}

impl QueueEngine {
    pub fn new(
        workspace_id: impl Into<String>,
        store: Arc<dyn QueueStore>,
        messages: Arc<dyn MessageStore>,
        provider: Arc<dyn EmailProvider>,
        renderer: Arc<dyn TemplateRenderer>,
        config: QueueEngineConfig,
    ) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            store,
            messages,
            provider,
            renderer,
            config,
        }
    }

    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.try_execute_batch().await {
                Ok(ExecutionOutcome::EmptyQueue) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.empty_queue_backoff) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Ok(ExecutionOutcome::TaskCompleted) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.tick_interval) => {}
                        _ = cancel.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = ?e, workspace_id = %self.workspace_id, "queue batch failed");
                    tokio::time::sleep(StdDuration::from_secs(1)).await;
                }
            }
        }
    }

    #[tracing::instrument(name = "execute queue batch", skip(self), fields(workspace_id = %self.workspace_id))]
    async fn try_execute_batch(&self) -> crate::error::CoreResult<ExecutionOutcome> {
        let entries = self.store.fetch_pending(&self.workspace_id, self.config.batch_size).await?;
        if entries.is_empty() {
            return Ok(ExecutionOutcome::EmptyQueue);
        }

        let mut join_set = JoinSet::new();
        for entry in entries {
            let store = self.store.clone();
            let messages = self.messages.clone();
            let provider = self.provider.clone();
            let renderer = self.renderer.clone();
            let workspace_id = self.workspace_id.clone();
            let config = self.config.clone();
            let span = tracing::info_span!("deliver queue entry", entry_id = %entry.id, to = %entry.to_address);

            join_set.spawn(
                async move {
                    deliver_one(&workspace_id, store, messages, provider, renderer, entry, &config).await
                }
                .instrument(span),
            );
        }

        while let Some(result) = join_set.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = ?e, "queue delivery task panicked or was cancelled");
            }
        }

        Ok(ExecutionOutcome::TaskCompleted)
    }
}

async fn deliver_one(
    workspace_id: &str,
    store: Arc<dyn QueueStore>,
    messages: Arc<dyn MessageStore>,
    provider: Arc<dyn EmailProvider>,
    renderer: Arc<dyn TemplateRenderer>,
    entry: QueueEntry,
    config: &QueueEngineConfig,
) {
    let claimed = match store.mark_as_processing(workspace_id, entry.id).await {
        Ok(claimed) => claimed,
        Err(e) => {
            tracing::error!(error = ?e, "mark_as_processing failed");
            return;
        }
    };
    if !claimed {
        tracing::debug!("entry already claimed by another worker, skipping");
        return;
    }

    let rendered = match &entry.template_id {
        Some(template_id) => renderer.render(&template_id.to_string(), &entry.template_data),
        None => Err(crate::error::CoreError::permanent(anyhow::anyhow!(
            "queue entry has no template_id"
        ))),
    };

    let rendered = match rendered {
        Ok(r) => r,
        Err(e) => {
            let _ = store
                .move_to_dead_letter(workspace_id, &entry, &format!("render failure: {e}"))
                .await;
            return;
        }
    };

    let envelope = Envelope {
        to_address: entry.to_address.clone(),
        subject: rendered.subject,
        html_body: rendered.html_body,
        text_body: rendered.text_body,
        client_message_id: entry.client_message_id.clone(),
    };

    match provider.send(&envelope).await {
        Ok(receipt) => {
            if let Err(e) = messages
                .record_sent(MessageHistory::sent(
                    workspace_id,
                    &entry.to_address,
                    entry.source_type.clone(),
                    entry.source_id,
                    receipt.provider_message_id,
                ))
                .await
            {
                tracing::error!(error = ?e, "failed to record message history before mark_as_sent");
            }
            if let Err(e) = store.mark_as_sent(workspace_id, entry.id).await {
                tracing::error!(error = ?e, "mark_as_sent failed");
            }
        }
        Err(ProviderError::Permanent { category, diagnostic }) => {
            tracing::warn!(category = %category, diagnostic = %diagnostic, "permanent provider failure, moving to dead letter");
            let _ = store
                .move_to_dead_letter(workspace_id, &entry, &format!("{category}: {diagnostic}"))
                .await;
        }
        Err(ProviderError::Transient { retry_after }) => {
            let next_attempt = entry.attempts + 1;
            if next_attempt >= entry.max_attempts {
                let _ = store
                    .move_to_dead_letter(workspace_id, &entry, "max attempts reached")
                    .await;
                return;
            }

            let delay = retry_after
                .map(Duration::from_std)
                .and_then(Result::ok)
                .unwrap_or_else(|| backoff_with_jitter(config.backoff_base, next_attempt as u32, config.backoff_cap));

            if let Err(e) = store
                .mark_as_failed(
                    workspace_id,
                    entry.id,
                    "transient provider error",
                    Some(Utc::now() + delay),
                )
                .await
            {
                tracing::error!(error = ?e, "mark_as_failed failed");
            }
        }
    }
}

/// `min(base·2^attempts + rand[0,base), cap)` (spec §4.2).
fn backoff_with_jitter(base: Duration, attempts: u32, cap: Duration) -> Duration {
    let exp = base
        .checked_mul(2i32.saturating_pow(attempts))
        .unwrap_or(cap);
    let base_ms = base.num_milliseconds().max(1);
    let jitter = Duration::milliseconds(rand::random::<u64>() as i64 % base_ms);
    std::cmp::min(exp + jitter, cap)
}
