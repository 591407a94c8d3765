//! Prometheus metrics for admission decisions.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::ratelimit::Strategy;

/// How a single admission check ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The store answered and the request is within its limit
    Admitted,
    /// The store answered and the request is over its limit
    Denied,
    /// The store failed and the request was admitted anyway
    FailOpen,
    /// The store failed and the request was denied
    FailClosed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Admitted => "admitted",
            Outcome::Denied => "denied",
            Outcome::FailOpen => "fail_open",
            Outcome::FailClosed => "fail_closed",
        }
    }
}

/// Metrics collector for the rate limiters.
#[derive(Clone)]
pub struct RateLimitMetrics {
    /// Admission decisions by strategy and outcome
    pub decisions_total: IntCounterVec,

    registry: Registry,
}

impl RateLimitMetrics {
    /// Create a collector with its own registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let decisions_total = IntCounterVec::new(
            Opts::new("rate_limit_decisions_total", "Admission decisions made by the rate limiter")
                .namespace("wayfarer"),
            &["strategy", "outcome"],
        )?;
        registry.register(Box::new(decisions_total.clone()))?;

        Ok(Self {
            decisions_total,
            registry,
        })
    }

    /// Count one decision.
    pub fn record(&self, strategy: Strategy, outcome: Outcome) {
        self.decisions_total
            .with_label_values(&[strategy.as_str(), outcome.as_str()])
            .inc();
    }

    /// Current count for one strategy and outcome.
    pub fn decisions(&self, strategy: Strategy, outcome: Outcome) -> u64 {
        self.decisions_total
            .with_label_values(&[strategy.as_str(), outcome.as_str()])
            .get()
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn render(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}
