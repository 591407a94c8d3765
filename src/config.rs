//! Configuration management for Wayfarer.
//!
//! Configuration comes from an optional YAML file, with the environment
//! variables the rest of the platform already uses layered on top.

use config::{Config, Environment};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{Result, WayfarerError};
use crate::ratelimit::Strategy;

/// Coordination store URL.
pub const ENV_REDIS_URL: &str = "REDIS_URL";
/// Requests allowed per window.
pub const ENV_RATE_LIMIT: &str = "RATE_LIMIT";
/// Window length in seconds.
pub const ENV_RATE_LIMIT_WINDOW: &str = "RATE_LIMIT_WINDOW";
/// Comma-separated proxy addresses whose `X-Forwarded-For` is honored.
pub const ENV_TRUSTED_PROXIES: &str = "TRUSTED_PROXIES";
/// Key namespace prefix.
pub const ENV_RATE_LIMIT_PREFIX: &str = "RATE_LIMIT_PREFIX";
/// `sliding_log` or `fixed_window`.
pub const ENV_RATE_LIMIT_STRATEGY: &str = "RATE_LIMIT_STRATEGY";
/// Per-call store timeout in milliseconds.
pub const ENV_REDIS_TIMEOUT_MS: &str = "REDIS_TIMEOUT_MS";
/// HTTP listen address.
pub const ENV_LISTEN_ADDR: &str = "LISTEN_ADDR";
/// `redis` or `memory`.
pub const ENV_STORE_BACKEND: &str = "STORE_BACKEND";
/// Key expected in `X-Metrics-API-Key` on `/metrics`.
pub const ENV_METRICS_API_KEY: &str = "METRICS_API_KEY";

/// Every variable read from the process environment.
const ENV_VARS: [&str; 10] = [
    ENV_REDIS_URL,
    ENV_RATE_LIMIT,
    ENV_RATE_LIMIT_WINDOW,
    ENV_TRUSTED_PROXIES,
    ENV_RATE_LIMIT_PREFIX,
    ENV_RATE_LIMIT_STRATEGY,
    ENV_REDIS_TIMEOUT_MS,
    ENV_LISTEN_ADDR,
    ENV_STORE_BACKEND,
    ENV_METRICS_API_KEY,
];

/// Default requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;
/// Default per-call store timeout in milliseconds.
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 500;
/// Default interval between sweeps of the in-memory store.
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
/// Longest accepted window (365 days). Larger values overflow the store's
/// millisecond expiry arithmetic.
pub const MAX_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Main configuration for the Wayfarer service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WayfarerConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Coordination store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Paths that bypass admission control, together with everything below them
    #[serde(default = "default_exempt_paths")]
    pub exempt_paths: Vec<String>,

    /// Key required in `X-Metrics-API-Key`; `/metrics` refuses every
    /// request while unset
    #[serde(default)]
    pub metrics_api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            exempt_paths: default_exempt_paths(),
            metrics_api_key: None,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_exempt_paths() -> Vec<String> {
    vec![
        "/healthcheck".to_string(),
        "/readiness".to_string(),
        "/metrics".to_string(),
    ]
}

/// Where limiter state is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Shared Redis server; limits hold across every instance
    #[default]
    Redis,
    /// Process memory; limits hold within this instance only
    Memory,
}

impl FromStr for StoreBackend {
    type Err = WayfarerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(WayfarerError::Config(format!(
                "unknown store backend {other:?}, expected redis or memory"
            ))),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StoreBackend::Redis => "redis",
            StoreBackend::Memory => "memory",
        })
    }
}

/// Coordination store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Which store holds limiter state
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Upper bound on a single limiter round trip, in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,

    /// Upper bound on the readiness probe's PING, in milliseconds
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Seconds between expired-key sweeps of the in-memory store
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            timeout_ms: default_store_timeout_ms(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

fn default_store_url() -> String {
    "redis://localhost:6379/0".to_string()
}

fn default_store_timeout_ms() -> u64 {
    DEFAULT_STORE_TIMEOUT_MS
}

fn default_readiness_timeout_ms() -> u64 {
    2000
}

fn default_sweep_interval_seconds() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECONDS
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Which window algorithm guards requests
    #[serde(default)]
    pub strategy: Strategy,

    /// Requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u64,

    /// Window length in seconds
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,

    /// Namespace prefix for rate limit keys
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Proxy addresses allowed to report the client through `X-Forwarded-For`
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            key_prefix: default_key_prefix(),
            trusted_proxies: Vec::new(),
        }
    }
}

fn default_max_requests() -> u64 {
    DEFAULT_MAX_REQUESTS
}

fn default_window_seconds() -> u64 {
    DEFAULT_WINDOW_SECONDS
}

fn default_key_prefix() -> String {
    "rl".to_string()
}

impl WayfarerConfig {
    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: WayfarerConfig =
            serde_yaml::from_str(yaml).map_err(|e| WayfarerError::Config(e.to_string()))?;
        config.sanitize();
        Ok(config)
    }

    /// Layer the process environment on top of this configuration.
    ///
    /// Only the variables this service reads are looked at, so unrelated
    /// variables holding non-UTF-8 bytes are never touched.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_env_source(env_snapshot(|name| std::env::var_os(name)))
    }

    /// Layer an explicit set of environment-style variables on top of this
    /// configuration.
    pub fn with_env_source(mut self, vars: config::Map<String, String>) -> Result<Self> {
        let vars = Config::builder()
            .add_source(Environment::default().source(Some(vars)))
            .build()
            .map_err(|e| WayfarerError::Config(e.to_string()))?;
        // The environment source lowercases every key.
        let lookup = |name: &str| vars.get_string(&name.to_ascii_lowercase()).ok();

        if let Some(url) = lookup(ENV_REDIS_URL) {
            self.store.url = url;
        }
        if let Some(raw) = lookup(ENV_REDIS_TIMEOUT_MS) {
            self.store.timeout_ms =
                parse_positive(ENV_REDIS_TIMEOUT_MS, &raw, DEFAULT_STORE_TIMEOUT_MS);
        }
        if let Some(raw) = lookup(ENV_RATE_LIMIT) {
            self.rate_limiting.max_requests =
                parse_positive(ENV_RATE_LIMIT, &raw, DEFAULT_MAX_REQUESTS);
        }
        if let Some(raw) = lookup(ENV_RATE_LIMIT_WINDOW) {
            self.rate_limiting.window_seconds =
                parse_positive(ENV_RATE_LIMIT_WINDOW, &raw, DEFAULT_WINDOW_SECONDS);
        }
        if let Some(raw) = lookup(ENV_TRUSTED_PROXIES) {
            self.rate_limiting.trusted_proxies = split_list(&raw);
        }
        if let Some(prefix) = lookup(ENV_RATE_LIMIT_PREFIX) {
            self.rate_limiting.key_prefix = prefix;
        }
        if let Some(raw) = lookup(ENV_RATE_LIMIT_STRATEGY) {
            self.rate_limiting.strategy = raw.parse()?;
        }
        if let Some(raw) = lookup(ENV_LISTEN_ADDR) {
            self.server.listen_addr = raw.trim().parse().map_err(|e| {
                WayfarerError::Config(format!("{ENV_LISTEN_ADDR}={raw:?} is not a socket address: {e}"))
            })?;
        }
        if let Some(raw) = lookup(ENV_STORE_BACKEND) {
            self.store.backend = raw.parse()?;
        }
        if let Some(key) = lookup(ENV_METRICS_API_KEY) {
            self.server.metrics_api_key = Some(key).filter(|k| !k.is_empty());
        }

        self.sanitize();
        Ok(self)
    }

    /// Replace out-of-range numeric settings with their defaults.
    fn sanitize(&mut self) {
        if self.rate_limiting.max_requests == 0 {
            warn!(default = DEFAULT_MAX_REQUESTS, "max_requests must be at least 1, using default");
            self.rate_limiting.max_requests = DEFAULT_MAX_REQUESTS;
        }
        if self.rate_limiting.window_seconds == 0 {
            warn!(default = DEFAULT_WINDOW_SECONDS, "window_seconds must be positive, using default");
            self.rate_limiting.window_seconds = DEFAULT_WINDOW_SECONDS;
        }
        if self.rate_limiting.window_seconds > MAX_WINDOW_SECONDS {
            warn!(
                window_seconds = self.rate_limiting.window_seconds,
                max = MAX_WINDOW_SECONDS,
                default = DEFAULT_WINDOW_SECONDS,
                "window_seconds is too large, using default"
            );
            self.rate_limiting.window_seconds = DEFAULT_WINDOW_SECONDS;
        }
        if self.store.timeout_ms == 0 {
            warn!(default = DEFAULT_STORE_TIMEOUT_MS, "store timeout must be positive, using default");
            self.store.timeout_ms = DEFAULT_STORE_TIMEOUT_MS;
        }
        if self.store.sweep_interval_seconds == 0 {
            warn!(default = DEFAULT_SWEEP_INTERVAL_SECONDS, "sweep interval must be positive, using default");
            self.store.sweep_interval_seconds = DEFAULT_SWEEP_INTERVAL_SECONDS;
        }
    }
}

/// Read the service's variables through `read`.
///
/// Values that are not valid UTF-8 are kept lossily, so numeric settings
/// fail to parse and fall back to their defaults.
fn env_snapshot(read: impl Fn(&str) -> Option<OsString>) -> config::Map<String, String> {
    ENV_VARS
        .iter()
        .filter_map(|&name| {
            let value = read(name)?.into_string().unwrap_or_else(|raw| {
                warn!(variable = name, "Environment variable is not valid UTF-8");
                raw.to_string_lossy().into_owned()
            });
            Some((name.to_string(), value))
        })
        .collect()
}

/// Parse a positive integer, falling back to `default` with a warning.
fn parse_positive(name: &str, raw: &str, default: u64) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => value,
        _ => {
            warn!(variable = name, value = raw, default, "Invalid integer setting, using default");
            default
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = WayfarerConfig::default();
        assert_eq!(config.server.listen_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.store.url, "redis://localhost:6379/0");
        assert_eq!(config.store.timeout(), Duration::from_millis(500));
        assert_eq!(config.rate_limiting.strategy, Strategy::FixedWindow);
        assert_eq!(config.rate_limiting.max_requests, 100);
        assert_eq!(config.rate_limiting.window_seconds, 60);
        assert_eq!(config.rate_limiting.key_prefix, "rl");
        assert!(config.rate_limiting.trusted_proxies.is_empty());
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.server.metrics_api_key, None);
        assert!(config.server.exempt_paths.contains(&"/metrics".to_string()));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  listen_addr: 127.0.0.1:9000
store:
  url: redis://cache:6379/2
  timeout_ms: 150
rate_limiting:
  strategy: sliding_log
  max_requests: 20
  window_seconds: 10
  key_prefix: bot
  trusted_proxies: ["10.0.0.5"]
"#;
        let config = WayfarerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.server.exempt_paths, default_exempt_paths());
        assert_eq!(config.store.url, "redis://cache:6379/2");
        assert_eq!(config.store.timeout_ms, 150);
        assert_eq!(config.store.readiness_timeout_ms, 2000);
        assert_eq!(config.rate_limiting.strategy, Strategy::SlidingLog);
        assert_eq!(config.rate_limiting.max_requests, 20);
        assert_eq!(config.rate_limiting.window_seconds, 10);
        assert_eq!(config.rate_limiting.key_prefix, "bot");
        assert_eq!(config.rate_limiting.trusted_proxies, vec!["10.0.0.5"]);
    }

    #[test]
    fn test_yaml_zero_window_falls_back() {
        let yaml = r#"
rate_limiting:
  max_requests: 0
  window_seconds: 0
"#;
        let config = WayfarerConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.rate_limiting.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.rate_limiting.window_seconds, DEFAULT_WINDOW_SECONDS);
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = WayfarerConfig::from_yaml("rate_limiting: [").unwrap_err();
        assert!(matches!(err, WayfarerError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let config = WayfarerConfig::default()
            .with_env_source(env(&[
                ("REDIS_URL", "redis://redis:6379/1"),
                ("RATE_LIMIT", "5"),
                ("RATE_LIMIT_WINDOW", "30"),
                ("TRUSTED_PROXIES", " 10.0.0.5, ,10.0.0.6 "),
                ("RATE_LIMIT_PREFIX", "api"),
                ("RATE_LIMIT_STRATEGY", "sliding_log"),
                ("REDIS_TIMEOUT_MS", "250"),
                ("LISTEN_ADDR", "127.0.0.1:8181"),
            ]))
            .unwrap();

        assert_eq!(config.store.url, "redis://redis:6379/1");
        assert_eq!(config.store.timeout_ms, 250);
        assert_eq!(config.rate_limiting.max_requests, 5);
        assert_eq!(config.rate_limiting.window_seconds, 30);
        assert_eq!(config.rate_limiting.trusted_proxies, vec!["10.0.0.5", "10.0.0.6"]);
        assert_eq!(config.rate_limiting.key_prefix, "api");
        assert_eq!(config.rate_limiting.strategy, Strategy::SlidingLog);
        assert_eq!(config.server.listen_addr, "127.0.0.1:8181".parse().unwrap());
    }

    #[test]
    fn test_non_numeric_env_falls_back_to_default() {
        let base = WayfarerConfig {
            rate_limiting: RateLimitingConfig {
                max_requests: 7,
                window_seconds: 9,
                ..Default::default()
            },
            ..Default::default()
        };

        let config = base
            .with_env_source(env(&[("RATE_LIMIT", "lots"), ("RATE_LIMIT_WINDOW", "-5")]))
            .unwrap();

        assert_eq!(config.rate_limiting.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.rate_limiting.window_seconds, DEFAULT_WINDOW_SECONDS);
    }

    #[test]
    fn test_unset_env_keeps_file_values() {
        let base = WayfarerConfig::from_yaml("rate_limiting:\n  max_requests: 42\n").unwrap();
        let config = base.with_env_source(env(&[])).unwrap();
        assert_eq!(config.rate_limiting.max_requests, 42);
    }

    #[test]
    fn test_unknown_strategy_is_rejected() {
        let err = WayfarerConfig::default()
            .with_env_source(env(&[("RATE_LIMIT_STRATEGY", "token_bucket")]))
            .unwrap_err();
        assert!(matches!(err, WayfarerError::Config(_)));
    }

    #[test]
    fn test_store_backend_and_metrics_key_from_env() {
        let config = WayfarerConfig::default()
            .with_env_source(env(&[("STORE_BACKEND", "Memory"), ("METRICS_API_KEY", "s3cret")]))
            .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.server.metrics_api_key.as_deref(), Some("s3cret"));

        let err = WayfarerConfig::default()
            .with_env_source(env(&[("STORE_BACKEND", "etcd")]))
            .unwrap_err();
        assert!(matches!(err, WayfarerError::Config(_)));

        let cleared = config.with_env_source(env(&[("METRICS_API_KEY", "")])).unwrap();
        assert_eq!(cleared.server.metrics_api_key, None);
    }

    #[test]
    fn test_oversized_window_falls_back() {
        let config = WayfarerConfig::default()
            .with_env_source(env(&[("RATE_LIMIT_WINDOW", "9223372036854775807")]))
            .unwrap();
        assert_eq!(config.rate_limiting.window_seconds, DEFAULT_WINDOW_SECONDS);

        let yaml = format!("rate_limiting:\n  window_seconds: {}\n", MAX_WINDOW_SECONDS + 1);
        let config = WayfarerConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.rate_limiting.window_seconds, DEFAULT_WINDOW_SECONDS);

        let yaml = format!("rate_limiting:\n  window_seconds: {MAX_WINDOW_SECONDS}\n");
        let config = WayfarerConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.rate_limiting.window_seconds, MAX_WINDOW_SECONDS);
    }

    #[test]
    fn test_zero_sweep_interval_falls_back() {
        let config = WayfarerConfig::from_yaml("store:\n  backend: memory\n  sweep_interval_seconds: 0\n").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.sweep_interval(), Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECONDS));
    }

    #[test]
    fn test_env_snapshot_reads_only_service_variables() {
        let snapshot = env_snapshot(|name| match name {
            "RATE_LIMIT" => Some(OsString::from("12")),
            "REDIS_URL" => Some(OsString::from("redis://cache:6379/0")),
            _ => None,
        });

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["RATE_LIMIT"], "12");
        assert_eq!(snapshot["REDIS_URL"], "redis://cache:6379/0");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_limit_falls_back_to_default() {
        use std::os::unix::ffi::OsStringExt;

        let snapshot = env_snapshot(|name| match name {
            "RATE_LIMIT" => Some(OsString::from_vec(vec![b'1', 0xff, 0xfe])),
            "RATE_LIMIT_WINDOW" => Some(OsString::from("30")),
            _ => None,
        });
        let config = WayfarerConfig::default().with_env_source(snapshot).unwrap();

        assert_eq!(config.rate_limiting.max_requests, DEFAULT_MAX_REQUESTS);
        assert_eq!(config.rate_limiting.window_seconds, 30);
    }

    #[cfg(unix)]
    #[test]
    fn test_unrelated_non_utf8_variable_does_not_break_loading() {
        use std::os::unix::ffi::OsStrExt;

        let name = "WAYFARER_TEST_UNRELATED_BINARY";
        std::env::set_var(name, std::ffi::OsStr::from_bytes(&[0xff, 0xfe]));
        let loaded = std::panic::catch_unwind(|| WayfarerConfig::default().with_env_overrides());
        std::env::remove_var(name);

        // Whatever the surrounding environment holds, loading must not panic.
        let loaded = loaded.expect("loading the environment panicked");
        if let Err(e) = loaded {
            assert!(matches!(e, WayfarerError::Config(_)));
        }
    }

    #[test]
    fn test_bad_listen_addr_is_rejected() {
        let err = WayfarerConfig::default()
            .with_env_source(env(&[("LISTEN_ADDR", "localhost")]))
            .unwrap_err();
        assert!(matches!(err, WayfarerError::Config(_)));
    }
}
