//! Redis-backed coordination store.
//!
//! Both window algorithms run as Lua scripts, so every read-evict-count-write
//! sequence executes atomically on the server against the server clock.

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use super::CoordinationStore;
use crate::config::StoreConfig;
use crate::error::{Result, WayfarerError};
use crate::ratelimit::{fixed_window, sliding_log, FixedWindowReply};

/// Coordination store backed by a Redis server.
///
/// Holds one auto-reconnecting multiplexed connection shared by every task;
/// the handle is opened at service start and closed at service stop.
pub struct RedisStore {
    /// Shared connection; `None` once the store has been closed
    conn: RwLock<Option<ConnectionManager>>,
    sliding_log: Script,
    fixed_window: Script,
}

impl RedisStore {
    /// Connect to the server named in `config`.
    ///
    /// The initial connection is bounded by the configured store timeout.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        let timeout = config.timeout();

        let conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| WayfarerError::StoreTimeout(timeout))??;

        info!("Connected to coordination store");

        Ok(Self {
            conn: RwLock::new(Some(conn)),
            sliding_log: Script::new(sliding_log::SCRIPT),
            fixed_window: Script::new(fixed_window::SCRIPT),
        })
    }

    /// Release the connection. Later calls fail with `StoreClosed`.
    pub fn close(&self) {
        if self.conn.write().take().is_some() {
            info!("Coordination store connection closed");
        }
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.conn.read().is_none()
    }

    fn connection(&self) -> Result<ConnectionManager> {
        self.conn.read().clone().ok_or(WayfarerError::StoreClosed)
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn sliding_window_admit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
        member: &str,
    ) -> Result<bool> {
        let mut conn = self.connection()?;

        let reply: i64 = self
            .sliding_log
            .key(key)
            .arg(window_seconds)
            .arg(max_requests)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        match reply {
            1 => Ok(true),
            0 => Ok(false),
            other => Err(WayfarerError::UnexpectedReply(format!(
                "sliding log script returned {other}"
            ))),
        }
    }

    async fn fixed_window_increment(&self, key: &str, window_seconds: u64) -> Result<FixedWindowReply> {
        let mut conn = self.connection()?;

        let reply: Vec<i64> = self
            .fixed_window
            .key(key)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await?;

        match reply.as_slice() {
            [count, ttl_seconds] if *count >= 1 => {
                debug!(key, count, ttl = ttl_seconds, "Fixed window increment");
                Ok(FixedWindowReply {
                    count: *count as u64,
                    ttl_seconds: *ttl_seconds,
                })
            }
            other => Err(WayfarerError::UnexpectedReply(format!(
                "fixed window script returned {other:?}"
            ))),
        }
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
