use super::Envelope;
use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Storage operations a queue backend must provide.
///
/// Every operation that moves a task between states is atomic in the backend,
/// so a crash between steps never loses or duplicates an envelope body.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Persists the envelope and appends it to the pending list.
    async fn push(&self, envelope: &Envelope) -> Result<()>;

    /// Moves the oldest pending task into the leased set until `lease` elapses.
    async fn claim(&self, lease: Duration) -> Result<Option<Envelope>>;

    /// Removes a leased task for good.
    async fn ack(&self, id: &str) -> Result<()>;

    /// Stores the updated envelope and keeps it leased until `delay` elapses,
    /// after which recovery makes it pending again.
    async fn retry(&self, envelope: &Envelope, delay: Duration) -> Result<()>;

    /// Moves a leased task to the dead-letter list.
    async fn bury(&self, envelope: &Envelope) -> Result<()>;

    /// Returns every task whose lease has expired to the pending list.
    async fn recover_expired(&self) -> Result<usize>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Newest dead-lettered envelopes first.
    async fn dead_letters(&self, limit: usize) -> Result<Vec<Envelope>>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub leased: u64,
    pub dead: u64,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("failed to encode task payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("task store unavailable: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NackOutcome {
    Retrying { attempt: u32, delay: Duration },
    DeadLettered,
}

/// Retry budget and backoff for failed tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl RetryPolicy {
    /// Default policy: 5 retries and 5s->5m exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_retries: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    #[must_use]
    pub fn with_backoff_max(mut self, max: Duration) -> Self {
        self.backoff_max = max;
        self
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let max_retries = self.max_retries.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        Self {
            max_retries,
            backoff_base,
            backoff_max,
        }
    }

    /// Delay before the given retry (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self.backoff_base, self.backoff_max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer and consumer facade over a [`QueueBackend`].
#[derive(Clone)]
pub struct TaskQueue {
    backend: Arc<dyn QueueBackend>,
    policy: RetryPolicy,
    poll_interval: Duration,
}

impl TaskQueue {
    #[must_use]
    pub fn new(backend: Arc<dyn QueueBackend>, policy: RetryPolicy) -> Self {
        Self {
            backend,
            policy: policy.normalize(),
            poll_interval: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.poll_interval = interval;
        }
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Persists a task and returns its id.
    ///
    /// # Errors
    /// Returns [`EnqueueError::Store`] when the backend rejects the write.
    #[instrument(skip_all, fields(task.type = %task_type))]
    pub async fn enqueue(&self, task_type: &str, payload: Vec<u8>) -> Result<String, EnqueueError> {
        let envelope = Envelope::new(task_type, payload);
        self.backend
            .push(&envelope)
            .await
            .map_err(EnqueueError::Store)?;
        debug!(task.id = %envelope.id, "Task enqueued");
        Ok(envelope.id)
    }

    /// Serializes `payload` as JSON and enqueues it.
    ///
    /// # Errors
    /// Returns [`EnqueueError::Encode`] if serialization fails, or
    /// [`EnqueueError::Store`] when the backend rejects the write.
    pub async fn enqueue_json<T: Serialize + Sync>(
        &self,
        task_type: &str,
        payload: &T,
    ) -> Result<String, EnqueueError> {
        let bytes = serde_json::to_vec(payload)?;
        self.enqueue(task_type, bytes).await
    }

    /// Claims the next pending task, polling until `wait` elapses.
    ///
    /// A zero `wait` checks once and returns.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be reached.
    pub async fn dequeue(&self, lease: Duration, wait: Duration) -> Result<Option<Envelope>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(envelope) = self.backend.claim(lease).await? {
                return Ok(Some(envelope));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(self.poll_interval)).await;
        }
    }

    /// # Errors
    /// Returns an error if the backend cannot be reached.
    pub async fn ack(&self, id: &str) -> Result<()> {
        self.backend.ack(id).await
    }

    /// Records a failed attempt: schedules a retry with backoff, or moves the
    /// task to the dead-letter list once the retry budget is spent.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be reached.
    #[instrument(skip(self, envelope, error), fields(task.id = %envelope.id, task.type = %envelope.task_type))]
    pub async fn nack(&self, mut envelope: Envelope, error: &str) -> Result<NackOutcome> {
        envelope.retried = envelope.retried.saturating_add(1);
        envelope.last_error = Some(error.to_string());

        if envelope.retried >= self.policy.max_retries {
            warn!(attempts = envelope.retried, "Task exhausted retries; dead-lettering");
            self.backend.bury(&envelope).await?;
            return Ok(NackOutcome::DeadLettered);
        }

        let delay = self.policy.delay_for(envelope.retried);
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(attempt = envelope.retried, delay_ms, "Task scheduled for retry");
        self.backend.retry(&envelope, delay).await?;
        Ok(NackOutcome::Retrying {
            attempt: envelope.retried,
            delay,
        })
    }

    /// Dead-letters a task without spending its remaining retries.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be reached.
    pub async fn bury(&self, mut envelope: Envelope, error: &str) -> Result<()> {
        envelope.retried = envelope.retried.saturating_add(1);
        envelope.last_error = Some(error.to_string());
        self.backend.bury(&envelope).await
    }

    /// # Errors
    /// Returns an error if the backend cannot be reached.
    pub async fn recover_expired(&self) -> Result<usize> {
        self.backend.recover_expired().await
    }

    /// # Errors
    /// Returns an error if the backend cannot be reached.
    pub async fn stats(&self) -> Result<QueueStats> {
        self.backend.stats().await
    }

    /// # Errors
    /// Returns an error if the backend cannot be reached.
    pub async fn dead_letters(&self, limit: usize) -> Result<Vec<Envelope>> {
        self.backend.dead_letters(limit).await
    }
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}
