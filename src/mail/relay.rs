use super::{Attachment, EmailSender, MailError, MailSettings};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{
        Attachment as MimeAttachment, Body, Mailbox, MultiPart, SinglePart,
        header::{ContentTransferEncoding, ContentType},
    },
};
use tracing::{Instrument, info_span};

/// Delivers through an unauthenticated local SMTP relay.
pub struct RelaySender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl RelaySender {
    /// # Errors
    /// Returns an error if the from address cannot be parsed.
    pub fn new(settings: &MailSettings) -> Result<Self> {
        let from = sender_mailbox(&settings.app_name, &settings.from)?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.relay_host)
            .port(settings.relay_port)
            .timeout(Some(settings.timeout))
            .build();
        Ok(Self { transport, from })
    }
}

fn sender_mailbox(app_name: &str, address: &str) -> Result<Mailbox> {
    let address = address
        .parse()
        .with_context(|| format!("Invalid MAIL_FROM address: {address}"))?;
    let name = app_name.trim();
    Ok(Mailbox::new((!name.is_empty()).then(|| name.to_string()), address))
}

/// Build a `multipart/mixed` message: the HTML body first, then one base64
/// part per attachment.
fn build_message(
    from: &Mailbox,
    to: &str,
    subject: &str,
    html: &str,
    attachments: &[Attachment],
) -> Result<Message> {
    let to: Mailbox = to
        .parse()
        .with_context(|| format!("Invalid recipient address: {to}"))?;

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(html.to_string()));
    for attachment in attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .or_else(|_| ContentType::parse("application/octet-stream"))
            .context("invalid attachment content type")?;
        let content = Body::new_with_encoding(attachment.content.clone(), ContentTransferEncoding::Base64)
            .map_err(|_| anyhow!("failed to encode attachment {}", attachment.filename))?;
        body = body.singlepart(MimeAttachment::new(attachment.filename.clone()).body(content, content_type));
    }

    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(subject)
        .multipart(body)
        .context("failed to build email message")
}

#[async_trait]
impl EmailSender for RelaySender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        attachments: &[Attachment],
    ) -> Result<(), MailError> {
        let message = build_message(&self.from, to, subject, html, attachments)
            .map_err(MailError::InvalidMessage)?;
        let span = info_span!("mail.send", mail.provider = "relay", mail.attachments = attachments.len());
        self.transport
            .send(message)
            .instrument(span)
            .await
            .context("mail relay rejected the message")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatted(message: &Message) -> String {
        String::from_utf8_lossy(&message.formatted()).into_owned()
    }

    #[test]
    fn from_header_carries_app_name() -> Result<()> {
        let from = sender_mailbox("Adly", "noreply@adly.dev")?;
        assert_eq!(from.to_string(), "Adly <noreply@adly.dev>");
        Ok(())
    }

    #[test]
    fn invalid_from_is_rejected() {
        assert!(sender_mailbox("Adly", "not an address").is_err());
    }

    #[test]
    fn message_is_multipart_with_base64_attachment() -> Result<()> {
        let from = sender_mailbox("Adly", "noreply@adly.dev")?;
        let attachments = vec![Attachment {
            filename: "report.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            content: vec![0x25, 0x50, 0x44, 0x46, 0x00, 0xff],
        }];
        let message = build_message(&from, "ada@example.com", "Hello", "<p>Hi</p>", &attachments)?;
        let raw = formatted(&message);

        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("text/html"));
        assert!(raw.contains("Content-Disposition: attachment"));
        assert!(raw.contains("report.pdf"));
        assert!(raw.contains("Content-Transfer-Encoding: base64"));
        assert!(raw.contains("JVBERgD/"));
        Ok(())
    }

    #[test]
    fn unknown_content_type_falls_back() -> Result<()> {
        let from = sender_mailbox("Adly", "noreply@adly.dev")?;
        let attachments = vec![Attachment {
            filename: "blob".to_string(),
            content_type: "???".to_string(),
            content: b"data".to_vec(),
        }];
        let message = build_message(&from, "ada@example.com", "Hello", "<p>Hi</p>", &attachments)?;
        assert!(formatted(&message).contains("application/octet-stream"));
        Ok(())
    }

    #[test]
    fn invalid_recipient_is_rejected() -> Result<()> {
        let from = sender_mailbox("Adly", "noreply@adly.dev")?;
        assert!(build_message(&from, "nope", "Hello", "<p>Hi</p>", &[]).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn invalid_recipient_fails_before_connecting() -> Result<()> {
        // Nothing listens on port 1; only a message error can come back.
        let sender = RelaySender::new(&MailSettings {
            app_name: "Adly".to_string(),
            relay_host: "127.0.0.1".to_string(),
            relay_port: 1,
            from: "noreply@adly.dev".to_string(),
            api_token: None,
            api_url: String::new(),
            timeout: std::time::Duration::from_secs(1),
        })?;
        let result = sender.send("not an address", "Hello", "<p>Hi</p>", &[]).await;
        assert!(matches!(result, Err(MailError::InvalidMessage(_))));
        Ok(())
    }
}
