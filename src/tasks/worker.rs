use super::{Envelope, NackOutcome, TaskQueue};
use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tokio::{task::JoinSet, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Failure reported by a [`TaskHandler`].
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient failure; the task is retried with backoff.
    #[error("{0:#}")]
    Retryable(anyhow::Error),
    /// The task can never succeed; it goes straight to the dead-letter list.
    #[error("{0:#}")]
    Permanent(anyhow::Error),
}

impl HandlerError {
    pub fn retryable(err: impl Into<anyhow::Error>) -> Self {
        Self::Retryable(err.into())
    }

    pub fn permanent(err: impl Into<anyhow::Error>) -> Self {
        Self::Permanent(err.into())
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Result<(), HandlerError>;
}

/// Task type to handler table, fixed before the pool starts.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn register(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }

    #[must_use]
    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    /// Fails fast when a task type producers will enqueue has no handler.
    ///
    /// # Errors
    /// Returns an error naming the first missing task type.
    pub fn ensure_registered(&self, task_types: &[&str]) -> Result<()> {
        for task_type in task_types {
            if !self.handlers.contains_key(*task_type) {
                bail!("no handler registered for task type {task_type}");
            }
        }
        Ok(())
    }
}

/// Worker pool tuning.
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    concurrency: usize,
    lease: Duration,
    handler_timeout: Duration,
    poll_wait: Duration,
    reap_interval: Duration,
    shutdown_timeout: Duration,
}

impl WorkerConfig {
    /// Default config: 10 workers, 60s lease, 30s handler timeout, 1s poll
    /// wait, 5s reaper cadence and an 8s shutdown grace period.
    #[must_use]
    pub fn new() -> Self {
        Self {
            concurrency: 10,
            lease: Duration::from_secs(60),
            handler_timeout: Duration::from_secs(30),
            poll_wait: Duration::from_secs(1),
            reap_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(8),
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    #[must_use]
    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    #[must_use]
    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    #[must_use]
    pub fn with_reap_interval(mut self, reap_interval: Duration) -> Self {
        self.reap_interval = reap_interval;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Clamp zero values and keep the lease longer than a handler may run,
    /// so a live handler never loses its task to the reaper.
    #[must_use]
    pub fn normalize(self) -> Self {
        let concurrency = self.concurrency.max(1);
        let handler_timeout = if self.handler_timeout.is_zero() {
            Duration::from_secs(1)
        } else {
            self.handler_timeout
        };
        let min_lease = handler_timeout + Duration::from_secs(5);
        let lease = self.lease.max(min_lease);
        let poll_wait = if self.poll_wait.is_zero() {
            Duration::from_millis(100)
        } else {
            self.poll_wait
        };
        let reap_interval = if self.reap_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.reap_interval
        };
        Self {
            concurrency,
            lease,
            handler_timeout,
            poll_wait,
            reap_interval,
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn lease(&self) -> Duration {
        self.lease
    }

    #[must_use]
    pub fn handler_timeout(&self) -> Duration {
        self.handler_timeout
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Ids of tasks whose handlers are currently running.
#[derive(Clone, Default)]
struct InFlight(Arc<Mutex<BTreeSet<String>>>);

impl InFlight {
    fn track(&self, id: &str) -> InFlightGuard {
        if let Ok(mut ids) = self.0.lock() {
            ids.insert(id.to_string());
        }
        InFlightGuard {
            in_flight: self.clone(),
            id: id.to_string(),
        }
    }

    fn ids(&self) -> Vec<String> {
        self.0
            .lock()
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Removes the id when the handler finishes or its future is dropped.
struct InFlightGuard {
    in_flight: InFlight,
    id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut ids) = self.in_flight.0.lock() {
            ids.remove(&self.id);
        }
    }
}

/// Fixed-size pool of workers draining a [`TaskQueue`].
pub struct WorkerPool {
    queue: TaskQueue,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
}

impl WorkerPool {
    #[must_use]
    pub fn new(queue: TaskQueue, registry: HandlerRegistry, config: WorkerConfig) -> Self {
        Self {
            queue,
            registry: Arc::new(registry),
            config: config.normalize(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// On cancellation workers stop claiming new tasks; in-flight handlers get
    /// the shutdown grace period to finish before they are aborted. An aborted
    /// task keeps its lease and is redelivered once the lease expires, so an
    /// elapsed grace period is logged but is not a failure of the pool.
    ///
    /// # Errors
    /// Does not fail today; the `Result` matches the other supervised units.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let mut workers = JoinSet::new();
        let in_flight = InFlight::default();

        for worker_id in 0..self.config.concurrency {
            let queue = self.queue.clone();
            let registry = Arc::clone(&self.registry);
            let config = self.config.clone();
            let stop = shutdown.clone();
            let in_flight = in_flight.clone();
            workers.spawn(
                worker_loop(queue, registry, config, in_flight, stop)
                    .instrument(info_span!("worker", worker.id = worker_id)),
            );
        }
        workers.spawn(reaper_loop(
            self.queue.clone(),
            self.config.reap_interval,
            shutdown.clone(),
        ));

        info!(
            concurrency = self.config.concurrency,
            lease_secs = self.config.lease.as_secs(),
            "Worker pool started"
        );

        shutdown.cancelled().await;
        info!("Worker pool draining");

        let drain = async {
            while let Some(joined) = workers.join_next().await {
                if let Err(err) = joined {
                    error!("worker task failed: {err}");
                }
            }
        };

        if timeout(self.config.shutdown_timeout, drain).await.is_err() {
            let task_ids = in_flight.ids();
            let grace_ms = u64::try_from(self.config.shutdown_timeout.as_millis()).unwrap_or(u64::MAX);
            warn!(
                ?task_ids,
                grace_ms,
                "Worker pool grace period elapsed; aborting in-flight handlers, their tasks are redelivered after the lease expires"
            );
            workers.abort_all();
            while workers.join_next().await.is_some() {}
        }

        info!("Worker pool stopped");
        Ok(())
    }
}

async fn worker_loop(
    queue: TaskQueue,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    in_flight: InFlight,
    stop: CancellationToken,
) {
    loop {
        let claimed = tokio::select! {
            biased;
            () = stop.cancelled() => break,
            claimed = queue.dequeue(config.lease, config.poll_wait) => claimed,
        };

        match claimed {
            Ok(Some(envelope)) => {
                let _running = in_flight.track(&envelope.id);
                process(&queue, &registry, &config, envelope).await;
            }
            Ok(None) => {}
            Err(err) => {
                error!("failed to claim task: {err:#}");
                tokio::select! {
                    () = stop.cancelled() => break,
                    () = tokio::time::sleep(config.poll_wait) => {}
                }
            }
        }
    }
    debug!("Worker stopped");
}

async fn process(
    queue: &TaskQueue,
    registry: &HandlerRegistry,
    config: &WorkerConfig,
    envelope: Envelope,
) {
    let span = info_span!(
        "task",
        task.id = %envelope.id,
        task.type = %envelope.task_type,
        task.retried = envelope.retried
    );

    async move {
        let Some(handler) = registry.get(&envelope.task_type) else {
            let reason = format!("no handler registered for task type {}", envelope.task_type);
            error!("{reason}");
            if let Err(err) = queue.bury(envelope, &reason).await {
                error!("failed to dead-letter task: {err:#}");
            }
            return;
        };

        let outcome = match timeout(config.handler_timeout, handler.handle(&envelope.payload)).await {
            Ok(result) => result,
            Err(_) => Err(HandlerError::Retryable(anyhow!(
                "handler timed out after {:?}",
                config.handler_timeout
            ))),
        };

        match outcome {
            Ok(()) => {
                if let Err(err) = queue.ack(&envelope.id).await {
                    // The lease will expire and the task runs again.
                    error!("failed to ack task: {err:#}");
                } else {
                    debug!("Task completed");
                }
            }
            Err(HandlerError::Permanent(err)) => {
                let reason = format!("{err:#}");
                warn!(error = %reason, "Task failed permanently");
                if let Err(err) = queue.bury(envelope, &reason).await {
                    error!("failed to dead-letter task: {err:#}");
                }
            }
            Err(HandlerError::Retryable(err)) => {
                let reason = format!("{err:#}");
                warn!(error = %reason, "Task failed");
                match queue.nack(envelope, &reason).await {
                    Ok(NackOutcome::Retrying { attempt, delay }) => {
                        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                        debug!(attempt, delay_ms, "Task will be retried");
                    }
                    Ok(NackOutcome::DeadLettered) => {}
                    Err(err) => error!("failed to record task failure: {err:#}"),
                }
            }
        }
    }
    .instrument(span)
    .await;
}

async fn reaper_loop(queue: TaskQueue, interval: Duration, stop: CancellationToken) {
    loop {
        match queue.recover_expired().await {
            Ok(0) => {}
            Ok(recovered) => info!(recovered, "Recovered tasks with expired leases"),
            Err(err) => error!("lease recovery failed: {err:#}"),
        }

        tokio::select! {
            () = stop.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }
}
