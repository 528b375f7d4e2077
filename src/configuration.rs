use secrecy::{ExposeSecret, Secret};
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub system_database: DatabaseSettings,
    pub workspace_database: DatabaseSettings,
    pub scheduler: SchedulerSettings,
    pub queue: QueueSettings,
    pub automation: AutomationSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub base_url: String,
}

/// Connection template. For the system DB this is used as-is; for a
/// workspace DB, `database_name` is replaced per-workspace by
/// `WorkspaceConnectionPool` (see workspace::pool).
#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub username: String,
    pub password: Secret<String>,
    pub database_name: String,
    pub require_ssl: bool,
}

impl DatabaseSettings {
    pub fn without_db(&self) -> PgConnectOptions {
        let ssl_mode = if self.require_ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        PgConnectOptions::new()
            .host(&self.host)
            .username(&self.username)
            .password(self.password.expose_secret())
            .port(self.port)
            .ssl_mode(ssl_mode)
    }

    pub fn with_db(&self) -> PgConnectOptions {
        self.without_db().database(&self.database_name)
    }

    /// Derive connection options for a specific workspace's database,
    /// keeping host/credentials from the template but swapping the
    /// database name for the workspace's own logical database.
    pub fn with_workspace_db(&self, database_name: &str) -> PgConnectOptions {
        self.without_db().database(database_name)
    }
}

#[derive(serde::Deserialize, Clone, Copy, Debug)]
pub struct SchedulerSettings {
    pub tick_interval_seconds: u64,
    pub batch_size: i64,
    pub default_max_runtime_seconds: i64,
    pub default_max_retries: i32,
    pub default_retry_interval_seconds: i64,
}

#[derive(serde::Deserialize, Clone, Copy, Debug)]
pub struct QueueSettings {
    pub worker_count: usize,
    pub fetch_batch_size: i64,
    pub backoff_base_seconds: u64,
    pub backoff_cap_seconds: u64,
    pub max_attempts: i32,
}

#[derive(serde::Deserialize, Clone, Copy, Debug)]
pub struct AutomationSettings {
    pub tick_interval_seconds: u64,
    pub batch_size: i64,
    pub max_synchronous_transitions: u32,
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{other} is not a supported environment. Use either `local` or `production`."
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
