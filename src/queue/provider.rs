use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;

/// A fully-rendered message ready to hand to a provider.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub to_address: String,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub client_message_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
}

/// Matches §6's adapter contract: transient failures carry an optional
/// provider-suggested retry delay, permanent ones carry a bounce/complaint
/// category the caller can log without inspecting provider internals.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider error")]
    Transient { retry_after: Option<Duration> },
    #[error("permanent provider error: {category}: {diagnostic}")]
    Permanent { category: String, diagnostic: String },
}

/// No concrete SMTP/SES/Mailgun adapter ships with this crate; production
/// wiring supplies one, tests use an in-memory fake.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send(&self, envelope: &Envelope) -> Result<ProviderReceipt, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct RenderedMessage {
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template_id: &str, variables: &Value) -> Result<RenderedMessage, CoreError>;
}

/// Fail-closed default used when a process is started without a concrete
/// provider wired in: every send is reported as a permanent failure so
/// entries land in the dead-letter table instead of retrying forever.
pub struct UnconfiguredEmailProvider;

#[async_trait]
impl EmailProvider for UnconfiguredEmailProvider {
    async fn send(&self, _envelope: &Envelope) -> Result<ProviderReceipt, ProviderError> {
        Err(ProviderError::Permanent {
            category: "unconfigured".to_string(),
            diagnostic: "no EmailProvider adapter is wired into this process".to_string(),
        })
    }
}

/// Fail-closed default paired with `UnconfiguredEmailProvider`.
pub struct UnconfiguredTemplateRenderer;

impl TemplateRenderer for UnconfiguredTemplateRenderer {
    fn render(&self, _template_id: &str, _variables: &Value) -> Result<RenderedMessage, CoreError> {
        Err(CoreError::permanent(anyhow::anyhow!(
            "no TemplateRenderer adapter is wired into this process"
        )))
    }
}
