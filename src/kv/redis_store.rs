use super::{KvStore, ttl_millis};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{Instrument, info_span};

const INCR_EX_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Open a managed (auto-reconnecting) connection and verify it with a `PING`.
///
/// # Errors
/// Returns an error if the URL is invalid or the server is unreachable.
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).context("Invalid key-value store URL")?;
    let mut manager = client
        .get_connection_manager()
        .await
        .context("Failed to connect to key-value store")?;

    redis::cmd("PING")
        .query_async::<_, String>(&mut manager)
        .await
        .context("Key-value store did not answer PING")?;

    Ok(manager)
}

#[derive(Clone)]
pub struct RedisKv {
    conn: ConnectionManager,
}

impl RedisKv {
    #[must_use]
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

fn span(operation: &'static str) -> tracing::Span {
    info_span!("kv.command", db.system = "redis", db.operation = operation)
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .instrument(span("GET"))
            .await
            .context("failed to read key")
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .instrument(span("SET"))
            .await
            .context("failed to write key")
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        // Reply is "OK" when written and nil when the key already existed.
        let reply = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<_, Option<String>>(&mut conn)
            .instrument(span("SET"))
            .await
            .context("failed to conditionally write key")?;
        Ok(reply.is_some())
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .instrument(span("GETDEL"))
            .await
            .context("failed to take key")
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn.clone();
        redis::Script::new(INCR_EX_SCRIPT)
            .key(key)
            .arg(ttl_millis(ttl))
            .invoke_async::<_, u64>(&mut conn)
            .instrument(span("EVALSHA"))
            .await
            .context("failed to increment counter")
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .instrument(span("PING"))
            .await
            .context("failed to ping key-value store")?;
        Ok(())
    }
}
