mod cursor;
mod workspace_id;

pub use cursor::Cursor;
pub use workspace_id::WorkspaceId;
