//! In-process coordination store.
//!
//! Emulates the Redis scripts inside one process: each key's state sits in
//! a sharded map and is only touched while its shard entry is held, which
//! gives the same per-key atomicity the store scripts have. The clock is
//! owned by the store, like the server clock the scripts read.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::CoordinationStore;
use crate::error::Result;
use crate::ratelimit::{FixedWindowCounter, FixedWindowReply, SlidingLog};

/// A coordination store held in process memory.
///
/// Only coordinates tasks inside one process; suitable for single-instance
/// deployments (`store.backend: memory`) and tests. Expired keys are only
/// dropped by [`MemoryStore::purge_expired`], which
/// [`MemoryStore::spawn_sweeper`] runs periodically.
pub struct MemoryStore {
    /// Sliding-log state indexed by rate limit key
    logs: DashMap<String, SlidingLog>,
    /// Fixed-window counters indexed by rate limit key
    counters: DashMap<String, FixedWindowCounter>,
    /// Origin of the store clock
    epoch: Instant,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
            counters: DashMap::new(),
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed on the store clock.
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Drop every key whose TTL has elapsed, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let now_ms = self.now_ms();
        let before = self.len();
        self.logs.retain(|_, log| !log.is_expired(now_ms));
        self.counters.retain(|_, counter| !counter.is_expired(now_ms));
        before.saturating_sub(self.len())
    }

    /// Keys held, expired or not.
    fn len(&self) -> usize {
        self.logs.len() + self.counters.len()
    }

    /// Purge expired keys every `period` until the store is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let purged = store.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = store.len(), "Purged expired rate limit keys");
                }
            }
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn sliding_window_admit(
        &self,
        key: &str,
        window_seconds: u64,
        max_requests: u64,
        member: &str,
    ) -> Result<bool> {
        let now_ms = self.now_ms();
        let mut log = self.logs.entry(key.to_string()).or_default();
        if log.is_expired(now_ms) {
            *log = SlidingLog::new();
        }

        let admitted = log.admit(now_ms, window_seconds, max_requests, member);
        trace!(key, now_ms, admitted, entries = log.len(), "Sliding log decision");
        Ok(admitted)
    }

    async fn fixed_window_increment(&self, key: &str, window_seconds: u64) -> Result<FixedWindowReply> {
        let now_ms = self.now_ms();
        let reply = self
            .counters
            .entry(key.to_string())
            .or_default()
            .increment(now_ms, window_seconds);

        trace!(key, now_ms, count = reply.count, ttl = reply.ttl_seconds, "Fixed window increment");
        Ok(reply)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_evicts_over_time() {
        let store = MemoryStore::new();

        assert!(store.sliding_window_admit("rl:a", 1, 2, "m1").await.unwrap());
        assert!(store.sliding_window_admit("rl:a", 1, 2, "m2").await.unwrap());
        assert!(!store.sliding_window_admit("rl:a", 1, 2, "m3").await.unwrap());

        tokio::time::advance(Duration::from_millis(1_001)).await;

        assert!(store.sliding_window_admit("rl:a", 1, 2, "m4").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_resets_after_ttl() {
        let store = MemoryStore::new();

        let first = store.fixed_window_increment("rl:b", 5).await.unwrap();
        assert_eq!(first, FixedWindowReply { count: 1, ttl_seconds: 5 });

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = store.fixed_window_increment("rl:b", 5).await.unwrap();
        assert_eq!(second, FixedWindowReply { count: 2, ttl_seconds: 3 });

        tokio::time::advance(Duration::from_secs(3)).await;
        let third = store.fixed_window_increment("rl:b", 5).await.unwrap();
        assert_eq!(third, FixedWindowReply { count: 1, ttl_seconds: 5 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();

        assert!(store.sliding_window_admit("rl:a", 60, 1, "m1").await.unwrap());
        assert!(store.sliding_window_admit("rl:b", 60, 1, "m2").await.unwrap());
        assert!(!store.sliding_window_admit("rl:a", 60, 1, "m3").await.unwrap());
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();

        store.sliding_window_admit("rl:a", 1, 5, "m1").await.unwrap();
        store.fixed_window_increment("rl:b", 10).await.unwrap();
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.counters.contains_key("rl:b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_drops_expired_keys() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = store.spawn_sweeper(Duration::from_secs(1));

        store.sliding_window_admit("rl:a", 1, 5, "m1").await.unwrap();
        store.fixed_window_increment("rl:b", 1).await.unwrap();
        store.fixed_window_increment("rl:c", 60).await.unwrap();

        tokio::time::sleep(Duration::from_millis(2_500)).await;

        assert_eq!(store.len(), 1);
        assert!(store.counters.contains_key("rl:c"));
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_when_store_dropped() {
        let store = Arc::new(MemoryStore::new());
        let sweeper = store.spawn_sweeper(Duration::from_secs(1));
        drop(store);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_atomic() {
        let store = Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.fixed_window_increment("rl:c", 60).await.unwrap() })
            })
            .collect();

        let mut counts: Vec<u64> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap().count)
            .collect();
        counts.sort_unstable();

        assert_eq!(counts, (1..=200).collect::<Vec<u64>>());
    }
}
