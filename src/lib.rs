//! Wayfarer - Distributed Request Rate Limiting
//!
//! This crate implements the admission control shared by the tour bot
//! platform's HTTP services. Limiter state lives in a single coordination
//! store (Redis), and every decision runs as one atomic server-side script,
//! so any number of processes can share a limit without local locking.

pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod ratelimit;
pub mod store;
