use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wayfarer::config::WayfarerConfig;
use wayfarer::http::{health_routes, metrics_routes, HttpServer, RateLimitLayer, TrustedProxies};
use wayfarer::metrics::RateLimitMetrics;
use wayfarer::ratelimit::{build_limiter, LimitConfig};
use wayfarer::store::StoreHandle;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "wayfarer")]
#[command(about = "Distributed request rate limiting backed by Redis")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting Wayfarer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match args.config.as_deref() {
        Some(path) => WayfarerConfig::from_file(path)?,
        None => WayfarerConfig::default(),
    }
    .with_env_overrides()?;
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    info!(
        listen_addr = %config.server.listen_addr,
        store = %config.store.backend,
        strategy = %config.rate_limiting.strategy,
        max_requests = config.rate_limiting.max_requests,
        window_seconds = config.rate_limiting.window_seconds,
        "Configuration loaded"
    );

    // Open the coordination store; it is released again after shutdown.
    let store_handle = StoreHandle::open(&config.store).await?;
    let store = store_handle.store();

    let metrics = Arc::new(RateLimitMetrics::new()?);
    if config.server.metrics_api_key.is_none() {
        warn!("No metrics API key configured, /metrics will refuse every request");
    }

    let limiter = build_limiter(
        config.rate_limiting.strategy,
        store.clone(),
        LimitConfig::from(&config),
        Some(metrics.clone()),
    );
    let trusted_proxies = TrustedProxies::from_entries(&config.rate_limiting.trusted_proxies);
    info!(trusted_proxies = trusted_proxies.len(), "Rate limiter initialized");

    let router = health_routes(store, config.store.readiness_timeout())
        .merge(metrics_routes(metrics, config.server.metrics_api_key.clone()))
        .layer(
            RateLimitLayer::new(limiter, trusted_proxies).with_exempt_paths(config.server.exempt_paths.clone()),
        );

    let served = HttpServer::new(config.server.listen_addr, router)
        .serve_with_shutdown(shutdown_signal())
        .await;

    // Release the store even when the server failed.
    store_handle.shutdown();
    served?;

    info!("Wayfarer stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
