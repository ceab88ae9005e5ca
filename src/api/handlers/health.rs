use crate::{GIT_COMMIT_HASH, kv::KvStore, service::AuthService};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info_span};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
    kv: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Database and key-value store are healthy", body = [Health]),
        (status = 503, description = "Database or key-value store is unhealthy", body = [Health])
    ),
    tag= "health"
)]
// axum handler for health
pub async fn health(
    method: Method,
    service: Extension<AuthService>,
    kv: Extension<Arc<dyn KvStore>>,
) -> impl IntoResponse {
    let database = match service.users().ping().await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping database: {err:#}");
            false
        }
    };

    let kv_span = info_span!("kv.ping", db.system = "redis", db.operation = "PING");
    let kv_ok = match kv.ping().instrument(kv_span).await {
        Ok(()) => true,
        Err(err) => {
            error!("Failed to ping key-value store: {err:#}");
            false
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: status_label(database),
        kv: status_label(kv_ok),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = health.commit.get(0..7).unwrap_or("");
    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            debug!("X-App header: {:?}", value);
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    let status = if database && kv_ok {
        StatusCode::OK
    } else {
        debug!(database, kv = kv_ok, "health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, headers, body)
}

fn status_label(ok: bool) -> String {
    if ok { "ok" } else { "error" }.to_string()
}
