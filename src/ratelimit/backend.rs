//! Rate limiter trait for abstracting the two window strategies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use super::limiter::{FixedWindowLimiter, LimitConfig, SlidingWindowLimiter};
use crate::error::WayfarerError;
use crate::metrics::RateLimitMetrics;
use crate::store::CoordinationStore;

/// Which window algorithm guards requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Precise sliding-window log; fails open when the store is unhealthy
    SlidingLog,
    /// Approximate fixed-window counter; fails closed when the store is unhealthy
    #[default]
    FixedWindow,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::SlidingLog => "sliding_log",
            Strategy::FixedWindow => "fixed_window",
        }
    }
}

impl FromStr for Strategy {
    type Err = WayfarerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding_log" => Ok(Strategy::SlidingLog),
            "fixed_window" => Ok(Strategy::FixedWindow),
            other => Err(WayfarerError::Config(format!(
                "unknown rate limit strategy {other:?}, expected sliding_log or fixed_window"
            ))),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub admitted: bool,
    /// Seconds until the window resets, when the algorithm reports one
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    pub fn admitted() -> Self {
        Self {
            admitted: true,
            retry_after: None,
        }
    }

    pub fn denied(retry_after: Option<u64>) -> Self {
        Self {
            admitted: false,
            retry_after,
        }
    }
}

/// Trait for rate limiter implementations.
///
/// This trait abstracts over the sliding-log and fixed-window limiters to
/// allow the admission middleware to work with either.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Check and record one request for `identifier`.
    ///
    /// Never fails: store errors are resolved by the limiter's own
    /// fail-open or fail-closed policy.
    async fn check(&self, identifier: &str) -> RateLimitDecision;

    /// Configured window length in seconds.
    fn window_seconds(&self) -> u64;

    /// The algorithm behind this limiter.
    fn strategy(&self) -> Strategy;
}

/// Build the limiter selected by `strategy` over a shared store handle,
/// counting its decisions in `metrics` when given.
pub fn build_limiter(
    strategy: Strategy,
    store: Arc<dyn CoordinationStore>,
    config: LimitConfig,
    metrics: Option<Arc<RateLimitMetrics>>,
) -> Arc<dyn RateLimiterBackend> {
    match (strategy, metrics) {
        (Strategy::SlidingLog, None) => Arc::new(SlidingWindowLimiter::new(store, config)),
        (Strategy::SlidingLog, Some(m)) => Arc::new(SlidingWindowLimiter::new(store, config).with_metrics(m)),
        (Strategy::FixedWindow, None) => Arc::new(FixedWindowLimiter::new(store, config)),
        (Strategy::FixedWindow, Some(m)) => Arc::new(FixedWindowLimiter::new(store, config).with_metrics(m)),
    }
}
