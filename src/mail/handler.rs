use super::{EmailPayload, EmailSender, MailError, TemplateRenderer};
use crate::tasks::{HandlerError, TaskHandler};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

/// Worker-side handler for `send:email` tasks.
///
/// Undecodable payloads, template failures and malformed messages are
/// permanent; delivery failures are retried by the queue.
pub struct SendEmailHandler {
    renderer: TemplateRenderer,
    sender: Arc<dyn EmailSender>,
}

impl SendEmailHandler {
    #[must_use]
    pub fn new(renderer: TemplateRenderer, sender: Arc<dyn EmailSender>) -> Self {
        Self { renderer, sender }
    }
}

#[async_trait]
impl TaskHandler for SendEmailHandler {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError> {
        let payload: EmailPayload = serde_json::from_slice(payload)
            .context("failed to decode email payload")
            .map_err(HandlerError::Permanent)?;

        let html = self
            .renderer
            .render(&payload.template_name, &payload.data)
            .await
            .map_err(HandlerError::permanent)?;

        match self
            .sender
            .send(&payload.to, &payload.subject, &html, &payload.attachments)
            .await
        {
            Ok(()) => {}
            Err(MailError::InvalidMessage(err)) => {
                error!(template = %payload.template_name, "Email cannot be sent: {err:#}");
                return Err(HandlerError::Permanent(err));
            }
            Err(MailError::Delivery(err)) => {
                error!(template = %payload.template_name, "Failed to send email: {err:#}");
                return Err(HandlerError::Retryable(err));
            }
        }

        info!(to = %payload.to, template = %payload.template_name, "Email sent");
        Ok(())
    }
}
