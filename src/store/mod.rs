//! Coordination store abstraction.
//!
//! All limiter state lives in the store; every operation here runs as one
//! atomic unit on the store side, so callers need no local locking.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::Result;
use crate::ratelimit::FixedWindowReply;

/// Trait for coordination store implementations.
///
/// This trait abstracts over the Redis-backed store and the in-process
/// emulation so the limiters can work with either.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Run one sliding-log decision for `key`, recording `member` when
    /// the request is admitted.
    async fn sliding_window_admit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
        member: &str,
    ) -> Result<bool>;

    /// Increment the fixed-window counter for `key`.
    async fn fixed_window_increment(&self, key: &str, window_seconds: u64) -> Result<FixedWindowReply>;

    /// Round-trip health probe.
    async fn ping(&self) -> Result<()>;
}

/// The store selected by configuration, plus what has to be released when
/// the service stops.
pub struct StoreHandle {
    store: Arc<dyn CoordinationStore>,
    redis: Option<Arc<RedisStore>>,
    sweeper: Option<JoinHandle<()>>,
}

impl StoreHandle {
    /// Open the backend named in `config`.
    ///
    /// The in-memory backend gets a background sweeper for expired keys.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreBackend::Redis => {
                let redis = Arc::new(RedisStore::open(config).await?);
                Ok(Self {
                    store: redis.clone(),
                    redis: Some(redis),
                    sweeper: None,
                })
            }
            StoreBackend::Memory => {
                warn!("Using the in-memory store, limits are not shared between instances");
                let memory = Arc::new(MemoryStore::new());
                let sweeper = memory.spawn_sweeper(config.sweep_interval());
                Ok(Self {
                    store: memory,
                    redis: None,
                    sweeper: Some(sweeper),
                })
            }
        }
    }

    /// Shared handle for limiters and health checks.
    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// Stop background work and close the Redis connection.
    ///
    /// Store handles still held elsewhere fail with `StoreClosed` afterwards
    /// when Redis-backed.
    pub fn shutdown(self) {
        if let Some(sweeper) = self.sweeper {
            sweeper.abort();
        }
        if let Some(redis) = self.redis {
            redis.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WayfarerError;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_memory_backend_opens_with_sweeper() {
        let config = StoreConfig {
            backend: StoreBackend::Memory,
            url: "not a url".to_string(),
            sweep_interval_seconds: 1,
            ..Default::default()
        };
        let handle = StoreHandle::open(&config).await.unwrap();
        let store = handle.store();

        assert!(handle.redis.is_none());
        assert!(store.sliding_window_admit("rl:a", 60, 1, "m1").await.unwrap());
        assert!(!store.sliding_window_admit("rl:a", 60, 1, "m2").await.unwrap());

        let sweeper = handle.sweeper.as_ref().map(|s| s.abort_handle()).unwrap();
        assert!(!sweeper.is_finished());

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn test_redis_backend_propagates_open_errors() {
        let config = StoreConfig {
            backend: StoreBackend::Redis,
            url: "not a url".to_string(),
            ..Default::default()
        };
        let result = StoreHandle::open(&config).await;
        assert!(matches!(result, Err(WayfarerError::Store(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Redis server at REDIS_URL"]
    async fn test_shutdown_closes_redis_store() {
        let config = StoreConfig {
            url: std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".to_string()),
            timeout_ms: 1000,
            ..Default::default()
        };
        let handle = StoreHandle::open(&config).await.unwrap();
        let store = handle.store();
        store.ping().await.unwrap();

        handle.shutdown();

        assert!(matches!(store.ping().await, Err(WayfarerError::StoreClosed)));
    }
}
