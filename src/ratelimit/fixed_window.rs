//! Fixed-window counter algorithm.
//!
//! A single counter per key, created with a TTL on first increment and
//! never extended afterwards. Windows start with the first request after
//! expiry rather than on wall-clock boundaries.

/// Server-side script executing one fixed-window increment atomically.
///
/// `KEYS[1]` is the rate limit key and `ARGV[1]` the window in seconds.
/// Replies `{count, ttl_seconds}`.
pub const SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
    return {count, tonumber(ARGV[1])}
end
return {count, redis.call('TTL', KEYS[1])}
"#;

/// Result of one fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindowReply {
    /// Counter value after the increment
    pub count: u64,
    /// Seconds until the window resets as reported by the store; may be
    /// non-positive when the store has no expiry for the key
    pub ttl_seconds: i64,
}

impl FixedWindowReply {
    /// Admitted iff the post-increment count is within the limit.
    pub fn within_limit(&self, max_requests: u64) -> bool {
        self.count <= max_requests
    }
}

/// In-process state of one fixed-window key.
#[derive(Debug, Clone, Default)]
pub struct FixedWindowCounter {
    count: u64,
    /// Key expiry in ms on the store clock; `None` while the key does not exist
    expires_at_ms: Option<u64>,
}

impl FixedWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment at `now_ms`, recreating the key if its TTL has elapsed.
    pub fn increment(&mut self, now_ms: u64, window_seconds: u64) -> FixedWindowReply {
        if self.is_expired(now_ms) {
            self.count = 0;
            self.expires_at_ms = None;
        }

        self.count += 1;
        if self.count == 1 {
            self.expires_at_ms = Some(now_ms.saturating_add(window_seconds.saturating_mul(1000)));
            return FixedWindowReply {
                count: self.count,
                ttl_seconds: window_seconds as i64,
            };
        }

        FixedWindowReply {
            count: self.count,
            ttl_seconds: self.ttl_seconds(now_ms),
        }
    }

    /// Whether the key has expired (or never existed) at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(true, |expires_at| now_ms >= expires_at)
    }

    /// Remaining TTL rounded to the nearest second, as the store reports it.
    fn ttl_seconds(&self, now_ms: u64) -> i64 {
        match self.expires_at_ms {
            Some(expires_at) => ((expires_at.saturating_sub(now_ms) + 500) / 1000) as i64,
            None => -1,
        }
    }
}
