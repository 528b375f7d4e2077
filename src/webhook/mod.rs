mod model;
mod signature;
mod store;

pub use model::{InboundWebhookEvent, WebhookEvent, WebhookSubscription};
pub use signature::sign_payload;
pub use store::{PgWebhookSubscriptionStore, WebhookSubscriptionStore};
