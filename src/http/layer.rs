//! Request admission middleware.
//!
//! A tower layer that runs every inbound request through the configured
//! rate limiter before it reaches the application, rejecting over-limit
//! clients with `429 Too Many Requests`.

use axum::{
    extract::{ConnectInfo, Request},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use super::client_ip::{client_identifier, TrustedProxies};
use crate::ratelimit::{RateLimitDecision, RateLimiterBackend};

/// Body of every rate limit rejection.
#[derive(serde::Serialize)]
struct TooManyRequests {
    detail: &'static str,
}

/// Build the rejection response for a denied request.
fn too_many_requests(retry_after: u64) -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_after.to_string())],
        Json(TooManyRequests {
            detail: "Too Many Requests",
        }),
    )
        .into_response()
}

/// Seconds to advertise in `Retry-After`: the algorithm's reported reset
/// time, or the whole window when none is reported.
fn retry_after_seconds(decision: &RateLimitDecision, window_seconds: u64) -> u64 {
    decision.retry_after.filter(|s| *s > 0).unwrap_or(window_seconds)
}

/// Shared middleware state.
#[derive(Clone)]
struct AdmissionState {
    limiter: Arc<dyn RateLimiterBackend>,
    trusted_proxies: Arc<TrustedProxies>,
    exempt_paths: Arc<Vec<String>>,
}

impl AdmissionState {
    fn is_exempt(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| covers(exempt, path))
    }
}

/// Whether `path` is `exempt` itself or lies below it.
fn covers(exempt: &str, path: &str) -> bool {
    match path.strip_prefix(exempt.trim_end_matches('/')) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Tower layer for request admission control
#[derive(Clone)]
pub struct RateLimitLayer {
    state: AdmissionState,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<dyn RateLimiterBackend>, trusted_proxies: TrustedProxies) -> Self {
        Self {
            state: AdmissionState {
                limiter,
                trusted_proxies: Arc::new(trusted_proxies),
                exempt_paths: Arc::new(Vec::new()),
            },
        }
    }

    /// Let requests for any of `paths`, or anything below them, bypass
    /// limiting.
    pub fn with_exempt_paths(mut self, paths: Vec<String>) -> Self {
        self.state.exempt_paths = Arc::new(paths);
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

/// Tower service for request admission control
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: AdmissionState,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request> + Clone + Send + 'static,
    S::Response: IntoResponse,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        // Keep the service that was polled ready; leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = self.state.clone();

        Box::pin(async move {
            if state.is_exempt(req.uri().path()) {
                return inner.call(req).await.map(IntoResponse::into_response);
            }

            let peer = req
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip());
            let identifier = client_identifier(req.headers(), peer, &state.trusted_proxies);

            let decision = state.limiter.check(&identifier).await;
            if !decision.admitted {
                let retry_after = retry_after_seconds(&decision, state.limiter.window_seconds());
                warn!(
                    identifier = %identifier,
                    retry_after,
                    path = %req.uri().path(),
                    "Rate limit exceeded"
                );
                return Ok(too_many_requests(retry_after));
            }

            inner.call(req).await.map(IntoResponse::into_response)
        })
    }
}
