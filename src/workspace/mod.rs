mod model;
mod pool;
mod store;

pub use model::Workspace;
pub use pool::{drop_database, provision_database, system_connection_pool, WorkspaceConnectionPool};
pub use store::{PgWorkspaceStore, WorkspaceStore};
