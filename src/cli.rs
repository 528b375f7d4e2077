use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::automation::{AutomationRuntime, AutomationRuntimeConfig};
use crate::configuration::{get_configuration, Settings};
use crate::domain::WorkspaceId;
use crate::queue::{
    PgQueueStore, QueueEngine, QueueEngineConfig, UnconfiguredEmailProvider,
    UnconfiguredTemplateRenderer,
};
use crate::message::PgMessageStore;
use crate::task::{
    AutomationTickHandler, CleanupHandler, HandlerRegistry, PgTaskStore, SchedulerConfig,
    SendBroadcastHandler, TaskScheduler,
};
use crate::workspace::{
    drop_database, provision_database, system_connection_pool, PgWorkspaceStore, Workspace,
    WorkspaceConnectionPool, WorkspaceStore,
};

#[derive(Parser)]
#[command(name = "transactional_core", about = "Multi-tenant transactional email and automation core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Starts the (external) HTTP layer's dependencies and blocks on shutdown.
    RunServer,
    /// Runs the task scheduler, queue engines, and automation runtime.
    RunWorker,
    /// Applies pending migrations to the system DB and every workspace DB.
    Migrate,
    /// Registers a new workspace and provisions its database.
    CreateWorkspace { id: String, name: String },
    /// Drops a workspace's database and its registration row.
    DeleteWorkspace { id: String },
}

enum CommandError {
    Config(String),
    Runtime(anyhow::Error),
}

impl From<crate::error::CoreError> for CommandError {
    fn from(e: crate::error::CoreError) -> Self {
        match e {
            crate::error::CoreError::Config(msg) => CommandError::Config(msg),
            other => CommandError::Runtime(other.into()),
        }
    }
}

impl From<sqlx::Error> for CommandError {
    fn from(e: sqlx::Error) -> Self {
        CommandError::Runtime(e.into())
    }
}

pub async fn run(cli: Cli) -> ExitCode {
    let settings = match get_configuration() {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(1);
        }
    };

    let outcome = match cli.command {
        Command::RunServer => run_server(settings).await,
        Command::RunWorker => run_worker(settings).await,
        Command::Migrate => migrate(settings).await,
        Command::CreateWorkspace { id, name } => create_workspace(settings, id, name).await,
        Command::DeleteWorkspace { id } => delete_workspace(settings, id).await,
    };

    match outcome {
        Ok(()) => ExitCode::from(0),
        Err(CommandError::Config(msg)) => {
            tracing::error!(error = %msg, "configuration error");
            ExitCode::from(1)
        }
        Err(CommandError::Runtime(e)) => {
            tracing::error!(error.cause_chain = ?e, error.message = %e, "runtime failure");
            ExitCode::from(2)
        }
    }
}

async fn run_server(settings: Settings) -> Result<(), CommandError> {
    let system_pool = system_connection_pool(&settings.system_database);
    let workspaces: Arc<dyn WorkspaceStore> = Arc::new(PgWorkspaceStore::new(system_pool));
    let pool = WorkspaceConnectionPool::new(settings.workspace_database.clone(), workspaces);

    // Touch the registry once so a misconfigured system DB fails fast
    // instead of surfacing on the first request.
    pool.all_workspace_ids().await?;

    tracing::info!("server dependencies ready, waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CommandError::Runtime(e.into()))?;
    Ok(())
}

async fn run_worker(settings: Settings) -> Result<(), CommandError> {
    let system_pool = system_connection_pool(&settings.system_database);
    let workspace_store: Arc<dyn WorkspaceStore> = Arc::new(PgWorkspaceStore::new(system_pool.clone()));
    let workspace_pool = Arc::new(WorkspaceConnectionPool::new(
        settings.workspace_database.clone(),
        workspace_store.clone(),
    ));

    let automation_runtime = Arc::new(AutomationRuntime::new(
        workspace_pool.clone(),
        AutomationRuntimeConfig {
            tick_interval: std::time::Duration::from_secs(settings.automation.tick_interval_seconds),
            global_batch_limit: settings.automation.batch_size,
            retry_backoff_base: chrono::Duration::seconds(30),
        },
    ));

    let mut handlers = HandlerRegistry::new();
    handlers
        .register(
            "send_broadcast",
            Arc::new(SendBroadcastHandler::new(workspace_pool.clone())),
        )
        .map_err(CommandError::Config)?;
    handlers
        .register(
            "automation_tick",
            Arc::new(AutomationTickHandler::new(
                automation_runtime.clone(),
                settings.automation.batch_size,
            )),
        )
        .map_err(CommandError::Config)?;
    handlers
        .register("cleanup", Arc::new(CleanupHandler::new(workspace_pool.clone())))
        .map_err(CommandError::Config)?;

    let task_store = Arc::new(PgTaskStore::new(system_pool));
    let scheduler = Arc::new(TaskScheduler::new(
        task_store,
        handlers,
        SchedulerConfig {
            tick_interval: std::time::Duration::from_secs(settings.scheduler.tick_interval_seconds),
            claim_batch_size: settings.scheduler.batch_size,
        },
    ));

    let workspace_ids = workspace_pool.all_workspace_ids().await?;

    let cancel = CancellationToken::new();
    let mut tasks = tokio::task::JoinSet::new();

    {
        let scheduler = scheduler.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { scheduler.run(cancel).await });
    }

    for workspace_id in &workspace_ids {
        let pool = workspace_pool.get(workspace_id).await?;
        let queue_store = Arc::new(PgQueueStore::new(pool.clone()));
        let message_store = Arc::new(PgMessageStore::new(pool));
        let engine = QueueEngine::new(
            workspace_id.to_string(),
            queue_store,
            message_store,
            Arc::new(UnconfiguredEmailProvider),
            Arc::new(UnconfiguredTemplateRenderer),
            QueueEngineConfig {
                tick_interval: std::time::Duration::from_millis(500),
                empty_queue_backoff: std::time::Duration::from_secs(10),
                batch_size: settings.queue.fetch_batch_size,
                backoff_base: chrono::Duration::seconds(settings.queue.backoff_base_seconds as i64),
                backoff_cap: chrono::Duration::seconds(settings.queue.backoff_cap_seconds as i64),
            },
        );
        let cancel = cancel.clone();
        tasks.spawn(async move { engine.run(cancel).await });
    }

    {
        let runtime = automation_runtime.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { runtime.run(cancel).await });
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received, stopping worker loops");
            cancel.cancel();
        }
    }

    while let Some(result) = tasks.join_next().await {
        report_exit("worker loop", result);
    }

    Ok(())
}

async fn migrate(settings: Settings) -> Result<(), CommandError> {
    let system_pool = system_connection_pool(&settings.system_database);
    sqlx::migrate!("./migrations/system")
        .run(&system_pool)
        .await
        .map_err(|e| CommandError::Runtime(e.into()))?;

    let workspace_store = PgWorkspaceStore::new(system_pool.clone());
    let workspace_pool = WorkspaceConnectionPool::new(settings.workspace_database.clone(), Arc::new(workspace_store));

    for workspace_id in workspace_pool.all_workspace_ids().await? {
        let pool = workspace_pool.get(&workspace_id).await?;
        sqlx::migrate!("./migrations/workspace")
            .run(&pool)
            .await
            .map_err(|e| CommandError::Runtime(e.into()))?;
    }

    tracing::info!("migrations applied");
    Ok(())
}

async fn create_workspace(settings: Settings, id: String, name: String) -> Result<(), CommandError> {
    let workspace_id = WorkspaceId::parse(id).map_err(CommandError::Config)?;
    let system_pool = system_connection_pool(&settings.system_database);
    let store = PgWorkspaceStore::new(system_pool);

    let workspace = Workspace::new(workspace_id, name);
    let database_name = workspace.database_name();
    provision_database(&settings.workspace_database, &database_name).await?;
    store.create(workspace).await?;

    tracing::info!(database_name = %database_name, "workspace created");
    Ok(())
}

async fn delete_workspace(settings: Settings, id: String) -> Result<(), CommandError> {
    let workspace_id = WorkspaceId::parse(id).map_err(CommandError::Config)?;
    let system_pool = system_connection_pool(&settings.system_database);
    let store = PgWorkspaceStore::new(system_pool);

    let workspace = store.get(&workspace_id).await?;
    let database_name = workspace.database_name();
    store.delete(&workspace_id).await?;
    drop_database(&settings.workspace_database, &database_name).await?;

    tracing::info!(database_name = %database_name, "workspace deleted");
    Ok(())
}

fn report_exit(loop_name: &str, outcome: Result<(), JoinError>) {
    match outcome {
        Ok(()) => tracing::info!("{loop_name} has exited"),
        Err(e) => tracing::error!(error.cause_chain = ?e, error.message = %e, "{loop_name} panicked"),
    }
}
