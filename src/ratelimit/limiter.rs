//! Rate limiter facades over the coordination store.
//!
//! Both limiters are stateless: they build the key, run one atomic store
//! operation and turn the reply (or the failure) into a decision. Store
//! failures never escape; each limiter applies its own policy.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};
use uuid::Uuid;

use super::backend::{RateLimitDecision, RateLimiterBackend, Strategy};
use super::key::RateLimitKey;
use crate::config::WayfarerConfig;
use crate::error::{Result, WayfarerError};
use crate::metrics::{Outcome, RateLimitMetrics};
use crate::store::CoordinationStore;

/// Configuration for a rate limiter.
#[derive(Debug, Clone)]
pub struct LimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_seconds: u64,
    /// Namespace prefix for keys
    pub key_prefix: String,
    /// Upper bound on one store round trip
    pub timeout: Duration,
}

impl From<&WayfarerConfig> for LimitConfig {
    fn from(config: &WayfarerConfig) -> Self {
        Self {
            max_requests: config.rate_limiting.max_requests,
            window_seconds: config.rate_limiting.window_seconds,
            key_prefix: config.rate_limiting.key_prefix.clone(),
            timeout: config.store.timeout(),
        }
    }
}

/// Await a store call, bounding it by `timeout`.
///
/// An in-flight script may still complete on the server after the timeout
/// fires; the slot it consumed is not given back.
async fn bounded<T>(timeout: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| WayfarerError::StoreTimeout(timeout))?
}

/// Precise limiter backed by a sliding-window log.
///
/// Fails open: when the store cannot answer, the request is admitted.
pub struct SlidingWindowLimiter {
    store: Arc<dyn CoordinationStore>,
    config: LimitConfig,
    metrics: Option<Arc<RateLimitMetrics>>,
}

impl SlidingWindowLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>, config: LimitConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    /// Count every decision in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<RateLimitMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, outcome: Outcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record(Strategy::SlidingLog, outcome);
        }
    }

    /// Record one attempt for `identifier`; `true` when it is admitted.
    pub async fn attempt(&self, identifier: &str) -> bool {
        let key = RateLimitKey::new(&self.config.key_prefix, identifier);
        let member = Uuid::new_v4().simple().to_string();

        trace!(key = %key, "Checking sliding window rate limit");

        let result = bounded(
            self.config.timeout,
            self.store.sliding_window_admit(
                &key.to_store_key(),
                self.config.window_seconds,
                self.config.max_requests,
                &member,
            ),
        )
        .await;

        match result {
            Ok(true) => {
                self.record(Outcome::Admitted);
                true
            }
            Ok(false) => {
                debug!(key = %key, limit = self.config.max_requests, "Sliding window rate limit exceeded");
                self.record(Outcome::Denied);
                false
            }
            Err(e) => {
                error!(key = %key, error = %e, "Coordination store failed during rate limit attempt, admitting request");
                self.record(Outcome::FailOpen);
                true
            }
        }
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }
}

#[async_trait]
impl RateLimiterBackend for SlidingWindowLimiter {
    async fn check(&self, identifier: &str) -> RateLimitDecision {
        if self.attempt(identifier).await {
            RateLimitDecision::admitted()
        } else {
            RateLimitDecision::denied(None)
        }
    }

    fn window_seconds(&self) -> u64 {
        self.config.window_seconds
    }

    fn strategy(&self) -> Strategy {
        Strategy::SlidingLog
    }
}

/// Approximate limiter backed by a fixed-window counter.
///
/// Fails closed: when the store cannot answer, the request is denied with a
/// retry hint of one full window.
pub struct FixedWindowLimiter {
    store: Arc<dyn CoordinationStore>,
    config: LimitConfig,
    metrics: Option<Arc<RateLimitMetrics>>,
}

impl FixedWindowLimiter {
    pub fn new(store: Arc<dyn CoordinationStore>, config: LimitConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    /// Count every decision in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<RateLimitMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, outcome: Outcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record(Strategy::FixedWindow, outcome);
        }
    }

    /// Record one attempt for `identifier`.
    ///
    /// Returns whether it is admitted and the seconds until the window
    /// resets (the full window when the store reports no positive TTL).
    pub async fn check(&self, identifier: &str) -> (bool, u64) {
        let key = RateLimitKey::new(&self.config.key_prefix, identifier);
        let window = self.config.window_seconds;

        trace!(key = %key, "Checking fixed window rate limit");

        let result = bounded(
            self.config.timeout,
            self.store.fixed_window_increment(&key.to_store_key(), window),
        )
        .await;

        match result {
            Ok(reply) => {
                let retry_after = if reply.ttl_seconds > 0 {
                    reply.ttl_seconds as u64
                } else {
                    window
                };
                let admitted = reply.within_limit(self.config.max_requests);
                if admitted {
                    self.record(Outcome::Admitted);
                } else {
                    debug!(
                        key = %key,
                        count = reply.count,
                        limit = self.config.max_requests,
                        retry_after,
                        "Fixed window rate limit exceeded"
                    );
                    self.record(Outcome::Denied);
                }
                (admitted, retry_after)
            }
            Err(e) => {
                error!(key = %key, error = %e, "Coordination store failed during rate limit check, denying request");
                self.record(Outcome::FailClosed);
                (false, window)
            }
        }
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }
}

#[async_trait]
impl RateLimiterBackend for FixedWindowLimiter {
    async fn check(&self, identifier: &str) -> RateLimitDecision {
        let (admitted, retry_after) = FixedWindowLimiter::check(self, identifier).await;
        RateLimitDecision {
            admitted,
            retry_after: Some(retry_after),
        }
    }

    fn window_seconds(&self) -> u64 {
        self.config.window_seconds
    }

    fn strategy(&self) -> Strategy {
        Strategy::FixedWindow
    }
}
