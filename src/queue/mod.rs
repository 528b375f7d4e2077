mod engine;
mod model;
mod provider;
mod store;

pub use engine::{ExecutionOutcome, QueueEngine, QueueEngineConfig};
pub use model::{DeadLetterEntry, QueueEntry, QueueEntryStatus, QueueStats, DEFAULT_MAX_ATTEMPTS, MARKETING_DEFAULT_PRIORITY};
pub use provider::{
    EmailProvider, Envelope, ProviderError, ProviderReceipt, RenderedMessage, TemplateRenderer,
    UnconfiguredEmailProvider, UnconfiguredTemplateRenderer,
};
pub use store::{PgQueueStore, PgTx, QueueStore};
