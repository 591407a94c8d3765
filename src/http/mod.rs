//! HTTP surface: admission middleware, health and metrics endpoints, and the
//! server.

mod client_ip;
mod health;
mod layer;
mod metrics;
mod server;

pub use client_ip::{client_identifier, TrustedProxies, UNKNOWN_CLIENT, X_FORWARDED_FOR};
pub use health::health_routes;
pub use layer::{RateLimitLayer, RateLimitService};
pub use metrics::{metrics_routes, X_METRICS_API_KEY};
pub use server::HttpServer;
