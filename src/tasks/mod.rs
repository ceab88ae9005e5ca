//! Durable task queue and worker pool.
//!
//! Producers enqueue [`Envelope`]s through a [`TaskQueue`]; a [`WorkerPool`]
//! claims them with a lease, dispatches to the [`TaskHandler`] registered for
//! the envelope's type and acknowledges, reschedules or dead-letters the task
//! depending on the outcome. A task whose lease expires without an ack is put
//! back on the pending list by the reaper, so delivery is at-least-once.

mod memory;
mod queue;
mod redis_queue;
mod worker;

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

pub use memory::MemoryQueue;
pub use queue::{EnqueueError, NackOutcome, QueueBackend, QueueStats, RetryPolicy, TaskQueue};
pub use redis_queue::RedisQueue;
pub use worker::{HandlerError, HandlerRegistry, TaskHandler, WorkerConfig, WorkerPool};

/// Dead letters kept per queue; the oldest are evicted beyond this.
pub const DEFAULT_DEAD_CAPACITY: usize = 10_000;

/// Unit of queued work as persisted in the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(with = "crate::encoding")]
    pub payload: Vec<u8>,
    /// Unix epoch milliseconds.
    pub enqueued_at: u64,
    #[serde(default)]
    pub retried: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Envelope {
    #[must_use]
    pub fn new(task_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            task_type: task_type.into(),
            payload,
            enqueued_at: now_millis(),
            retried: 0,
            last_error: None,
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_json_layout() -> anyhow::Result<()> {
        let envelope = Envelope {
            id: "01J0000000000000000000000".to_string(),
            task_type: "send:email".to_string(),
            payload: b"{}".to_vec(),
            enqueued_at: 1_700_000_000_000,
            retried: 2,
            last_error: Some("smtp timeout".to_string()),
        };
        let value = serde_json::to_value(&envelope)?;
        assert_eq!(value["type"], "send:email");
        assert_eq!(value["payload"], "e30=");
        assert_eq!(value["retried"], 2);
        assert_eq!(value["last_error"], "smtp timeout");

        let decoded: Envelope = serde_json::from_value(value)?;
        assert_eq!(decoded, envelope);
        Ok(())
    }

    #[test]
    fn new_envelope_starts_fresh() {
        let envelope = Envelope::new("send:email", vec![1, 2, 3]);
        assert_eq!(envelope.retried, 0);
        assert!(envelope.last_error.is_none());
        assert_eq!(envelope.id.len(), 26);
        assert!(envelope.enqueued_at > 0);
    }
}
