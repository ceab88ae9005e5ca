use super::{Attachment, EmailSender, MailError};
use crate::APP_USER_AGENT;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::time::Duration;
use tracing::{Instrument, error, info_span};

/// Delivers through a transactional-email HTTP API (Postmark wire format).
pub struct ApiSender {
    client: Client,
    url: String,
    from: String,
    token: SecretString,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ApiRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html_body: &'a str,
    attachments: Vec<ApiAttachment<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct ApiAttachment<'a> {
    name: &'a str,
    content: String,
    content_type: &'a str,
}

impl ApiSender {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: &str, from: &str, token: SecretString, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()
            .context("failed to build email API client")?;
        Ok(Self {
            client,
            url: url.to_string(),
            from: from.to_string(),
            token,
        })
    }
}

#[async_trait]
impl EmailSender for ApiSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        attachments: &[Attachment],
    ) -> Result<(), MailError> {
        let request = ApiRequest {
            from: &self.from,
            to,
            subject,
            html_body: html,
            attachments: attachments
                .iter()
                .map(|attachment| ApiAttachment {
                    name: &attachment.filename,
                    content: Base64::encode_string(&attachment.content),
                    content_type: &attachment.content_type,
                })
                .collect(),
        };

        let span = info_span!("mail.send", mail.provider = "api", http.url = %self.url);
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .header("X-Postmark-Server-Token", self.token.expose_secret())
            .json(&request)
            .send()
            .instrument(span)
            .await
            .context("email API request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Email API rejected message: {} {}", status, body);
            return Err(anyhow!("email API responded with {status}").into());
        }

        Ok(())
    }
}
