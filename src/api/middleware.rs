//! Request guards: bearer authentication and per-client rate limiting.

use crate::{
    kv::KvStore,
    service::{AuthService, MessageResponse},
};
use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tracing::{Instrument, debug, info_span, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

/// Fixed-window request counter per client IP, kept in the key-value store.
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
    limit: u64,
    window: Duration,
}

impl RateLimiter {
    /// Default limiter: 100 requests per 60s window.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            limit: 100,
            window: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = if window.is_zero() {
            Duration::from_secs(1)
        } else {
            window
        };
        self
    }

    /// Count one request for `ip`. Store failures let the request through.
    pub async fn check(&self, ip: &str) -> RateLimitDecision {
        let key = format!("rate_limit_{ip}");
        let span = info_span!("kv.command", db.system = "redis", db.operation = "INCR");
        match self.kv.incr_ex(&key, self.window).instrument(span).await {
            Ok(count) if count > self.limit => RateLimitDecision::Limited,
            Ok(_) => RateLimitDecision::Allowed,
            Err(err) => {
                warn!("rate limiter unavailable: {err:#}");
                RateLimitDecision::Allowed
            }
        }
    }
}

pub(crate) async fn rate_limit(
    Extension(limiter): Extension<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_client_ip(request.headers())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string());

    if limiter.check(&ip).await == RateLimitDecision::Limited {
        debug!(client.ip = %ip, "rate limited");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(MessageResponse::new("Too Many Requests")),
        )
            .into_response();
    }

    next.run(request).await
}

/// Resolve the bearer token to a user and attach it to the request.
pub(crate) async fn require_auth(
    Extension(service): Extension<AuthService>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        return unauthorized();
    };

    match service.authenticate(token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(err) => {
            debug!("authentication failed: {err}");
            unauthorized()
        }
    }
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(MessageResponse::new("Unauthorized")),
    )
        .into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use axum::http::HeaderValue;

    #[test]
    fn extract_client_ip_prefers_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn extract_client_ip_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("9.9.9.9"));
        assert_eq!(extract_client_ip(&headers), Some("9.9.9.9".to_string()));
        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_counts_per_ip_and_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()))
            .with_limit(2)
            .with_window(Duration::from_secs(60));

        assert_eq!(limiter.check("1.1.1.1").await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("1.1.1.1").await, RateLimitDecision::Allowed);
        assert_eq!(limiter.check("1.1.1.1").await, RateLimitDecision::Limited);
        assert_eq!(limiter.check("2.2.2.2").await, RateLimitDecision::Allowed);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.check("1.1.1.1").await, RateLimitDecision::Allowed);
    }
}
