//! Sliding-window log algorithm.
//!
//! Each admitted request leaves one timestamped entry in an ordered set.
//! Before every decision, entries older than the window are evicted and the
//! survivors are counted; a request is admitted only while the count is
//! strictly below the limit.

use std::collections::BTreeSet;

/// Server-side script executing one sliding-log decision atomically.
///
/// `KEYS[1]` is the rate limit key; `ARGV` is `window_seconds`,
/// `max_requests` and a unique member token. Replies `1` when admitted and
/// `0` when denied. The clock is the store's own `TIME`, so every
/// coordinating process sees the same "now".
pub const SCRIPT: &str = r#"
local key = KEYS[1]
local window_ms = tonumber(ARGV[1]) * 1000
local max_requests = tonumber(ARGV[2])
local member = ARGV[3]
local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)
redis.call('ZREMRANGEBYSCORE', key, 0, now_ms - window_ms)
local count = redis.call('ZCARD', key)
if count < max_requests then
    redis.call('ZADD', key, now_ms, member)
    redis.call('PEXPIRE', key, window_ms)
    return 1
end
return 0
"#;

/// In-process state of one sliding-log key.
///
/// Mirrors the sorted set plus key expiry kept by the store script.
#[derive(Debug, Clone, Default)]
pub struct SlidingLog {
    /// (timestamp in ms, member token), ordered by timestamp then token
    entries: BTreeSet<(u64, String)>,
    /// Key expiry in ms on the store clock; `None` until the first admission
    expires_at_ms: Option<u64>,
}

impl SlidingLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide one request at `now_ms`.
    ///
    /// Returns `true` and records `member` when admitted. A denied request
    /// leaves the log untouched apart from eviction of stale entries.
    pub fn admit(&mut self, now_ms: u64, window_seconds: u64, max_requests: u64, member: &str) -> bool {
        let window_ms = window_seconds.saturating_mul(1000);
        self.evict(now_ms, window_ms);

        if (self.entries.len() as u64) < max_requests {
            self.entries.insert((now_ms, member.to_string()));
            self.expires_at_ms = Some(now_ms.saturating_add(window_ms));
            true
        } else {
            false
        }
    }

    /// Whether the key's TTL has elapsed at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |expires_at| now_ms >= expires_at)
    }

    /// Number of entries currently held, stale or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry scored at or below `now_ms - window_ms`.
    fn evict(&mut self, now_ms: u64, window_ms: u64) {
        let Some(cutoff) = now_ms.checked_sub(window_ms) else {
            return;
        };
        // Entries are ordered by timestamp, so everything after the split
        // point is newer than the cutoff.
        let fresh = self.entries.split_off(&(cutoff + 1, String::new()));
        self.entries = fresh;
    }
}
