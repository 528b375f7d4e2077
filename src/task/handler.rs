use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::model::{HandlerOutcome, Task};

/// One handler per task type (spec §9 — registry keyed by string, no
/// subclassing required to add a new task type).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, cancel: CancellationToken, task: Task) -> HandlerOutcome;
}

#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<(), String> {
        let task_type = task_type.into();
        if self.handlers.contains_key(&task_type) {
            return Err(format!("handler already registered for task type {task_type}"));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopHandler;

    #[async_trait]
    impl TaskHandler for NoopHandler {
        async fn handle(&self, _cancel: CancellationToken, _task: Task) -> HandlerOutcome {
            HandlerOutcome::Done
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register("ping", Arc::new(NoopHandler)).unwrap();
        let err = registry.register("ping", Arc::new(NoopHandler)).unwrap_err();
        assert!(err.contains("ping"));
    }

    #[test]
    fn unknown_type_resolves_to_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("unknown").is_none());
    }
}
