mod model;
mod store;

pub use model::{TimelineEntry, TimelineOperation, TimelinePage};
pub use store::{PgTimelineStore, TimelineStore};
