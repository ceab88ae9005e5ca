//! Transactional email: payloads, templates and delivery.
//!
//! Service flows never talk to a mail server directly. They enqueue an
//! [`EmailPayload`] as a `send:email` task; the worker-side
//! [`SendEmailHandler`] renders the named template and hands the HTML to the
//! configured [`EmailSender`].

mod api;
mod handler;
mod relay;
mod template;

pub use api::ApiSender;
pub use handler::SendEmailHandler;
pub use relay::RelaySender;
pub use template::{TemplateError, TemplateRenderer};

use crate::tasks::{EnqueueError, TaskQueue};
use anyhow::{Context, Result};
use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::info;

/// Task type for outgoing email.
pub const SEND_EMAIL: &str = "send:email";

pub const DEFAULT_API_URL: &str = "https://api.postmarkapp.com/email";

/// Self-contained description of one email, stored as the task payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EmailPayload {
    pub template_name: String,
    pub to: String,
    pub subject: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    #[serde(with = "crate::encoding")]
    pub content: Vec<u8>,
}

/// Failure reported by an [`EmailSender`].
#[derive(Debug, Error)]
pub enum MailError {
    /// The message itself is malformed (recipient, headers); resending it
    /// fails the same way.
    #[error("invalid message: {0:#}")]
    InvalidMessage(anyhow::Error),
    /// The provider could not be reached or refused the message.
    #[error(transparent)]
    Delivery(#[from] anyhow::Error),
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver one rendered message.
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        attachments: &[Attachment],
    ) -> Result<(), MailError>;
}

/// Enqueue an email for asynchronous delivery.
///
/// # Errors
/// Returns [`EnqueueError`] when the payload cannot be encoded or stored.
pub async fn enqueue_email(queue: &TaskQueue, payload: &EmailPayload) -> Result<String, EnqueueError> {
    queue.enqueue_json(SEND_EMAIL, payload).await
}

/// Delivery settings shared by both providers.
#[derive(Clone, Debug)]
pub struct MailSettings {
    pub app_name: String,
    pub relay_host: String,
    pub relay_port: u16,
    pub from: String,
    pub api_token: Option<SecretString>,
    pub api_url: String,
    pub timeout: Duration,
}

/// Which sender delivers mail in this process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Provider {
    /// Local SMTP relay (development).
    Relay,
    /// Transactional-email HTTP API (production).
    Api,
}

impl Provider {
    #[must_use]
    pub fn for_environment(production: bool) -> Self {
        if production { Self::Api } else { Self::Relay }
    }
}

/// Build the sender for `provider`.
///
/// # Errors
/// Returns an error if the from address is invalid, the API token is missing
/// for the API provider, or the HTTP client cannot be built.
pub fn build_sender(provider: Provider, settings: &MailSettings) -> Result<Arc<dyn EmailSender>> {
    let sender: Arc<dyn EmailSender> = match provider {
        Provider::Relay => Arc::new(RelaySender::new(settings)?),
        Provider::Api => {
            let token = settings
                .api_token
                .clone()
                .context("MAIL_TOKEN is required when delivering through the email API")?;
            Arc::new(ApiSender::new(&settings.api_url, &settings.from, token, settings.timeout)?)
        }
    };
    info!(?provider, "Mail provider selected");
    Ok(sender)
}
