use super::{DEFAULT_DEAD_CAPACITY, Envelope, QueueBackend, QueueStats, now_millis};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{Instrument, debug, info_span, warn};

/// Pops the oldest pending id, leases it and returns the envelope body.
const CLAIM_SCRIPT: &str = r"
local id = redis.call('RPOP', KEYS[1])
if not id then
    return false
end
local body = redis.call('GET', ARGV[2] .. id)
if not body then
    return false
end
redis.call('ZADD', KEYS[2], ARGV[1], id)
return {id, body}
";

/// Moves leases that expired before ARGV[1] back onto the pending list.
const RECOVER_SCRIPT: &str = r"
local ids = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
for _, id in ipairs(ids) do
    redis.call('ZREM', KEYS[1], id)
    redis.call('LPUSH', KEYS[2], id)
end
return #ids
";

/// Moves ARGV[1] from the leased set onto the dead list, storing ARGV[2] as
/// its body unless empty, then evicts the oldest dead letters and their
/// bodies beyond ARGV[3] entries.
const BURY_SCRIPT: &str = r"
if ARGV[2] ~= '' then
    redis.call('SET', ARGV[4] .. ARGV[1], ARGV[2])
end
redis.call('ZREM', KEYS[1], ARGV[1])
redis.call('LPUSH', KEYS[2], ARGV[1])
local cap = tonumber(ARGV[3])
local evicted = 0
while redis.call('LLEN', KEYS[2]) > cap do
    local old = redis.call('RPOP', KEYS[2])
    redis.call('DEL', ARGV[4] .. old)
    evicted = evicted + 1
end
return evicted
";

const RECOVER_BATCH: usize = 100;

/// Redis-backed queue.
///
/// Keys for queue `q`:
/// - `adly:q:pending` list of ids, pushed left and popped right.
/// - `adly:q:leased` sorted set of ids scored by lease expiry (epoch ms).
/// - `adly:q:dead` list of dead-lettered ids, newest on the left, capped at
///   `dead_capacity` entries.
/// - `adly:q:task:<id>` the envelope as JSON.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    pending: String,
    leased: String,
    dead: String,
    task_prefix: String,
    dead_capacity: usize,
}

impl RedisQueue {
    #[must_use]
    pub fn new(conn: ConnectionManager, queue: &str) -> Self {
        Self {
            conn,
            pending: format!("adly:{queue}:pending"),
            leased: format!("adly:{queue}:leased"),
            dead: format!("adly:{queue}:dead"),
            task_prefix: format!("adly:{queue}:task:"),
            dead_capacity: DEFAULT_DEAD_CAPACITY,
        }
    }

    /// Keep at most `capacity` dead letters (at least one).
    #[must_use]
    pub fn with_dead_capacity(mut self, capacity: usize) -> Self {
        self.dead_capacity = capacity.max(1);
        self
    }

    /// Dead-letter `id`, replacing its stored body when `body` is given.
    async fn dead_letter(&self, id: &str, body: Option<&str>) -> Result<()> {
        let mut conn = self.conn.clone();
        let evicted = redis::Script::new(BURY_SCRIPT)
            .key(&self.leased)
            .key(&self.dead)
            .arg(id)
            .arg(body.unwrap_or_default())
            .arg(self.dead_capacity)
            .arg(&self.task_prefix)
            .invoke_async::<_, usize>(&mut conn)
            .instrument(span("EVALSHA bury"))
            .await
            .context("failed to dead-letter task")?;
        if evicted > 0 {
            debug!(evicted, "Evicted oldest dead letters");
        }
        Ok(())
    }

    fn task_key(&self, id: &str) -> String {
        format!("{}{id}", self.task_prefix)
    }
}

fn span(operation: &'static str) -> tracing::Span {
    info_span!("queue.command", db.system = "redis", db.operation = operation)
}

fn expires_at(delay: Duration) -> u64 {
    now_millis().saturating_add(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX))
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn push(&self, envelope: &Envelope) -> Result<()> {
        let body = serde_json::to_string(envelope).context("failed to encode envelope")?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.task_key(&envelope.id))
            .arg(body)
            .ignore()
            .cmd("LPUSH")
            .arg(&self.pending)
            .arg(&envelope.id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .instrument(span("MULTI SET LPUSH"))
            .await
            .context("failed to push task")
    }

    async fn claim(&self, lease: Duration) -> Result<Option<Envelope>> {
        let mut conn = self.conn.clone();
        let body = redis::Script::new(CLAIM_SCRIPT)
            .key(&self.pending)
            .key(&self.leased)
            .arg(expires_at(lease))
            .arg(&self.task_prefix)
            .invoke_async::<_, Option<(String, String)>>(&mut conn)
            .instrument(span("EVALSHA claim"))
            .await
            .context("failed to claim task")?;

        let Some((id, body)) = body else {
            return Ok(None);
        };
        match serde_json::from_str::<Envelope>(&body) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(err) => {
                // Left leased, the reaper would hand it out forever.
                warn!(task.id = %id, error = %err, "Dead-lettering undecodable task envelope");
                self.dead_letter(&id, None)
                    .await
                    .context("failed to dead-letter undecodable task")?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("ZREM")
            .arg(&self.leased)
            .arg(id)
            .ignore()
            .cmd("DEL")
            .arg(self.task_key(id))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .instrument(span("MULTI ZREM DEL"))
            .await
            .context("failed to ack task")
    }

    async fn retry(&self, envelope: &Envelope, delay: Duration) -> Result<()> {
        let body = serde_json::to_string(envelope).context("failed to encode envelope")?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(self.task_key(&envelope.id))
            .arg(body)
            .ignore()
            .cmd("ZADD")
            .arg(&self.leased)
            .arg(expires_at(delay))
            .arg(&envelope.id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .instrument(span("MULTI SET ZADD"))
            .await
            .context("failed to schedule task retry")
    }

    async fn bury(&self, envelope: &Envelope) -> Result<()> {
        let body = serde_json::to_string(envelope).context("failed to encode envelope")?;
        self.dead_letter(&envelope.id, Some(&body)).await
    }

    async fn recover_expired(&self) -> Result<usize> {
        let mut conn = self.conn.clone();
        let mut total = 0;
        loop {
            let moved = redis::Script::new(RECOVER_SCRIPT)
                .key(&self.leased)
                .key(&self.pending)
                .arg(now_millis())
                .arg(RECOVER_BATCH)
                .invoke_async::<_, usize>(&mut conn)
                .instrument(span("EVALSHA recover"))
                .await
                .context("failed to recover expired leases")?;
            total += moved;
            if moved < RECOVER_BATCH {
                return Ok(total);
            }
        }
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.conn.clone();
        let (pending, leased, dead) = redis::pipe()
            .cmd("LLEN")
            .arg(&self.pending)
            .cmd("ZCARD")
            .arg(&self.leased)
            .cmd("LLEN")
            .arg(&self.dead)
            .query_async::<_, (u64, u64, u64)>(&mut conn)
            .instrument(span("LLEN ZCARD LLEN"))
            .await
            .context("failed to read queue stats")?;
        Ok(QueueStats {
            pending,
            leased,
            dead,
        })
    }

    async fn dead_letters(&self, limit: usize) -> Result<Vec<Envelope>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let ids = redis::cmd("LRANGE")
            .arg(&self.dead)
            .arg(0)
            .arg(stop)
            .query_async::<_, Vec<String>>(&mut conn)
            .instrument(span("LRANGE"))
            .await
            .context("failed to list dead letters")?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.task_key(id)).collect();
        let bodies = redis::cmd("MGET")
            .arg(&keys)
            .query_async::<_, Vec<Option<String>>>(&mut conn)
            .instrument(span("MGET"))
            .await
            .context("failed to read dead letters")?;

        Ok(bodies
            .into_iter()
            .flatten()
            .filter_map(|body| serde_json::from_str(&body).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_expiry_is_in_the_future() {
        let now = now_millis();
        let expiry = expires_at(Duration::from_secs(60));
        assert!(expiry >= now + 60_000);
    }
}
