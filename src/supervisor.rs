//! Runs the long-lived units of the process and drives shutdown.
//!
//! Units are spawned onto a [`JoinSet`] and share one [`CancellationToken`].
//! The first unit to exit (with or without an error) or the shutdown signal
//! starts the teardown: cancel, drain within `shutdown_timeout`, abort
//! stragglers, then close shared resources in registration order.

use anyhow::{Result, anyhow};
use std::{future::Future, pin::Pin, time::Duration};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

type CloseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type Closer = Box<dyn FnOnce() -> CloseFuture + Send>;

pub struct Supervisor {
    shutdown: CancellationToken,
    units: JoinSet<(String, Result<()>)>,
    resources: Vec<(String, Closer)>,
    shutdown_timeout: Duration,
}

impl Supervisor {
    #[must_use]
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            units: JoinSet::new(),
            resources: Vec::new(),
            shutdown_timeout,
        }
    }

    /// Token cancelled when shutdown begins.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start a unit. `run` receives the shutdown token and should return once
    /// it is cancelled.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, run: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let unit = run(self.shutdown.clone());
        info!(unit = %name, "Starting unit");
        self.units.spawn(async move { (name, unit.await) });
    }

    /// Register a shared resource to close after every unit has stopped.
    pub fn close_on_shutdown<F, Fut>(&mut self, name: impl Into<String>, close: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.resources
            .push((name.into(), Box::new(move || Box::pin(close()))));
    }

    /// Wait for `signal` or the first unit to exit, then shut everything down.
    ///
    /// # Errors
    /// Returns the first unit failure, or an error when units had to be
    /// aborted after the shutdown timeout.
    pub async fn run<S>(mut self, signal: S) -> Result<()>
    where
        S: Future<Output = ()> + Send,
    {
        let mut failure: Option<anyhow::Error> = None;

        tokio::select! {
            () = signal => info!("Shutdown signal received"),
            Some(joined) = self.units.join_next() => {
                record_exit(joined, &mut failure);
            }
        }

        self.shutdown.cancel();
        info!("Shutting down units");

        let units = &mut self.units;
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            let mut failures = Vec::new();
            while let Some(joined) = units.join_next().await {
                let mut unit_failure = None;
                record_exit(joined, &mut unit_failure);
                failures.extend(unit_failure);
            }
            failures
        })
        .await;

        match drained {
            Ok(failures) => {
                if failure.is_none() {
                    failure = failures.into_iter().next();
                }
            }
            Err(_) => {
                warn!(
                    timeout_ms = u64::try_from(self.shutdown_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Units did not stop in time; aborting"
                );
                self.units.abort_all();
                while self.units.join_next().await.is_some() {}
                if failure.is_none() {
                    failure = Some(anyhow!("shutdown timed out"));
                }
            }
        }

        for (name, close) in self.resources.drain(..) {
            info!(resource = %name, "Closing resource");
            close().await;
        }

        match failure {
            Some(err) => Err(err),
            None => {
                info!("Shutdown complete");
                Ok(())
            }
        }
    }
}

fn record_exit(joined: Result<(String, Result<()>), JoinError>, failure: &mut Option<anyhow::Error>) {
    match joined {
        Ok((name, Ok(()))) => info!(unit = %name, "Unit stopped"),
        Ok((name, Err(err))) => {
            error!(unit = %name, "Unit failed: {err:#}");
            if failure.is_none() {
                *failure = Some(err.context(format!("{name} failed")));
            }
        }
        Err(err) if err.is_cancelled() => {}
        Err(err) => {
            error!("Unit panicked: {err}");
            if failure.is_none() {
                *failure = Some(anyhow!("unit panicked: {err}"));
            }
        }
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
