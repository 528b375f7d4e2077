use secrecy::Secret;
use sqlx::PgPool;
use transactional_core::configuration::DatabaseSettings;
use transactional_core::workspace::{drop_database, provision_database};

/// Connection template pointed at a local Postgres instance. Mirrors the
/// defaults in `configuration/base.yaml`; override the host via
/// `TEST_DATABASE_HOST` when running against a non-local instance.
fn template() -> DatabaseSettings {
    DatabaseSettings {
        port: 5432,
        host: std::env::var("TEST_DATABASE_HOST").unwrap_or_else(|_| "localhost".to_string()),
        username: "postgres".to_string(),
        password: Secret::new("password".to_string()),
        database_name: "unused".to_string(),
        require_ssl: false,
    }
}

/// One disposable logical database per test, torn down on drop. Each test
/// gets its own database rather than sharing one so concurrent `cargo test`
/// runs never see each other's rows — the same isolation every workspace
/// gets from the real process via `WorkspaceConnectionPool`.
pub struct TestDatabase {
    pub template: DatabaseSettings,
    pub name: String,
    pub pool: PgPool,
}

async fn build(migrations_dir: &str, prefix: &str) -> TestDatabase {
    let template = template();
    let name = format!("{prefix}_{}", uuid::Uuid::new_v4().simple());

    provision_database(&template, &name)
        .await
        .expect("failed to provision test database");

    let pool = PgPool::connect_with(template.with_workspace_db(&name))
        .await
        .expect("failed to connect to test database");

    match migrations_dir {
        "system" => sqlx::migrate!("./migrations/system")
            .run(&pool)
            .await
            .expect("failed to run system migrations"),
        "workspace" => sqlx::migrate!("./migrations/workspace")
            .run(&pool)
            .await
            .expect("failed to run workspace migrations"),
        other => panic!("unknown migrations_dir {other}"),
    }

    TestDatabase { template, name, pool }
}

pub async fn system_db() -> TestDatabase {
    build("system", "test_system").await
}

pub async fn workspace_db() -> TestDatabase {
    build("workspace", "test_workspace").await
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        // drop_database needs a fresh connection and an async runtime; spawn
        // onto a throwaway current-thread runtime since Drop can't be async.
        let template = self.template.clone();
        let name = self.name.clone();
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build cleanup runtime");
            rt.block_on(async {
                let _ = drop_database(&template, &name).await;
            });
        })
        .join()
        .ok();
    }
}
