//! Key-value store abstraction.
//!
//! The service only needs a handful of primitives from the key-value store:
//! plain reads, writes with a TTL, "set if absent" for cooldown gates, an
//! atomic take (get + delete) for one-time tokens and an atomic counter for
//! rate limiting. Redis provides all of them; the in-memory store mirrors the
//! same semantics for tests and local runs.

mod memory;
mod redis_store;

pub use memory::MemoryKv;
pub use redis_store::{RedisKv, connect};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, `None` when missing or expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Write only if the key is absent. Returns `true` when the write happened.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomically read and delete a value.
    async fn take(&self, key: &str) -> Result<Option<String>>;

    /// Increment a counter, starting its TTL on the first increment.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

/// Build the key-value store URL from its parts.
///
/// `scheme == "tls"` selects `rediss://`, anything else plain `redis://`.
///
/// # Errors
/// Returns an error if the host cannot form a valid URL or credentials cannot be set.
pub fn connection_url(
    host: &str,
    port: u16,
    username: Option<&str>,
    password: Option<&str>,
    scheme: &str,
) -> Result<Url> {
    let scheme = if scheme.eq_ignore_ascii_case("tls") {
        "rediss"
    } else {
        "redis"
    };

    let mut url = Url::parse(&format!("{scheme}://{host}:{port}/0"))
        .with_context(|| format!("Invalid key-value store host: {host}"))?;

    if let Some(username) = username.filter(|u| !u.is_empty()) {
        url.set_username(username)
            .map_err(|()| anyhow!("Error setting username"))?;
    }

    if let Some(password) = password.filter(|p| !p.is_empty()) {
        url.set_password(Some(password))
            .map_err(|()| anyhow!("Error setting password"))?;
    }

    Ok(url)
}

pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
