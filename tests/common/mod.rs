#![allow(dead_code)]

use adly::{
    kv::{KvStore, MemoryKv},
    mail::EmailPayload,
    service::{AccessTokens, AuthConfig, AuthService},
    store::MemoryUserStore,
    tasks::{MemoryQueue, RetryPolicy, TaskQueue},
    tokens::TokenStore,
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};

pub const API_HOST: &str = "http://localhost:6060";

pub struct Fixture {
    pub service: AuthService,
    pub queue: TaskQueue,
    pub kv: Arc<dyn KvStore>,
}

pub fn fixture() -> Fixture {
    fixture_with(AuthConfig::new(API_HOST), RetryPolicy::new())
}

pub fn fixture_with(config: AuthConfig, policy: RetryPolicy) -> Fixture {
    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let queue = TaskQueue::new(Arc::new(MemoryQueue::new()), policy)
        .with_poll_interval(Duration::from_millis(10));
    let service = AuthService::new(
        Arc::new(MemoryUserStore::new()),
        TokenStore::new(kv.clone()),
        queue.clone(),
        AccessTokens::new(&SecretString::from("integration-test-key")),
        config,
    );
    Fixture { service, queue, kv }
}

/// Claim, decode and ack every pending email task.
pub async fn drain_emails(queue: &TaskQueue) -> Result<Vec<EmailPayload>> {
    let mut emails = Vec::new();
    while let Some(envelope) = queue
        .dequeue(Duration::from_secs(30), Duration::ZERO)
        .await?
    {
        let payload: EmailPayload = serde_json::from_slice(&envelope.payload)?;
        queue.ack(&envelope.id).await?;
        emails.push(payload);
    }
    Ok(emails)
}

/// Token query parameter of the link stored under `key` in the email data.
pub fn link_token(email: &EmailPayload, key: &str) -> Result<String> {
    let link = email
        .data
        .get(key)
        .and_then(|value| value.as_str())
        .with_context(|| format!("email data has no {key}"))?;
    let (_, token) = link.split_once("?token=").context("link has no token")?;
    Ok(token.to_string())
}
