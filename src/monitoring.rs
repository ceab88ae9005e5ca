//! Read-only queue inspection endpoint, served on its own port.

use crate::tasks::{Envelope, QueueStats, TaskQueue};
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

const DEFAULT_DEAD_LIMIT: usize = 50;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub retried: u32,
    pub last_error: Option<String>,
    pub enqueued_at: u64,
}

impl From<Envelope> for DeadLetter {
    fn from(envelope: Envelope) -> Self {
        Self {
            id: envelope.id,
            task_type: envelope.task_type,
            retried: envelope.retried,
            last_error: envelope.last_error,
            enqueued_at: envelope.enqueued_at,
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct DeadQuery {
    limit: Option<usize>,
}

#[must_use]
pub fn router(queue: TaskQueue) -> Router {
    Router::new()
        .route("/monitoring", get(stats))
        .route("/monitoring/dead", get(dead))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(queue))
}

/// Serve the monitoring router until `shutdown` is cancelled.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn serve(listener: TcpListener, queue: TaskQueue, shutdown: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Monitoring listening on {}", addr);
    }

    axum::serve(listener, router(queue))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("monitoring server failed")
}

/// Bind `addr`, then serve until `shutdown` is cancelled.
///
/// # Errors
/// Returns an error if the address cannot be bound or the server fails.
pub async fn listen(addr: SocketAddr, queue: TaskQueue, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind monitoring port {}", addr.port()))?;
    serve(listener, queue, shutdown).await
}

async fn stats(queue: Extension<TaskQueue>) -> Response {
    match queue.stats().await {
        Ok(stats) => Json::<QueueStats>(stats).into_response(),
        Err(err) => unavailable(&err),
    }
}

async fn dead(queue: Extension<TaskQueue>, Query(query): Query<DeadQuery>) -> Response {
    let limit = query.limit.unwrap_or(DEFAULT_DEAD_LIMIT).clamp(1, 1_000);
    match queue.dead_letters(limit).await {
        Ok(envelopes) => Json(
            envelopes
                .into_iter()
                .map(DeadLetter::from)
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(err) => unavailable(&err),
    }
}

fn unavailable(err: &anyhow::Error) -> Response {
    error!("queue inspection failed: {err:#}");
    (StatusCode::SERVICE_UNAVAILABLE, "queue unavailable").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{MemoryQueue, RetryPolicy};
    use axum::{
        body::{Body, to_bytes},
        http::Request,
    };
    use serde_json::Value;
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    async fn get_json(app: Router, uri: &str) -> Value {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn reports_stats_and_dead_letters() -> Result<()> {
        let queue = TaskQueue::new(Arc::new(MemoryQueue::new()), RetryPolicy::new());
        queue.enqueue("send:email", b"{}".to_vec()).await?;
        queue.enqueue("send:email", b"{}".to_vec()).await?;

        let claimed = queue
            .dequeue(Duration::from_secs(30), Duration::ZERO)
            .await?
            .context("expected a task")?;
        queue.bury(claimed, "template missing").await?;

        let stats = get_json(router(queue.clone()), "/monitoring").await;
        assert_eq!(stats["pending"], 1);
        assert_eq!(stats["leased"], 0);
        assert_eq!(stats["dead"], 1);

        let dead = get_json(router(queue), "/monitoring/dead?limit=10").await;
        assert_eq!(dead.as_array().map(Vec::len), Some(1));
        assert_eq!(dead[0]["type"], "send:email");
        assert_eq!(dead[0]["last_error"], "template missing");
        Ok(())
    }
}
