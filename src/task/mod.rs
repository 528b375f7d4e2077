mod handler;
mod handlers;
mod model;
mod scheduler;
mod store;

pub use handler::{HandlerRegistry, TaskHandler};
pub use handlers::{AutomationTickHandler, CleanupHandler, SendBroadcastHandler};
pub use model::{HandlerOutcome, Subtask, Task, TaskFilter, TaskStatus};
pub use scheduler::{SchedulerConfig, TaskScheduler};
pub use store::{backoff_with_jitter, PgTaskStore, TaskStore};
