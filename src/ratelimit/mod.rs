//! Rate limiting algorithms and limiter facades.

mod backend;
mod key;
mod limiter;

pub mod fixed_window;
pub mod sliding_log;

pub use backend::{build_limiter, RateLimitDecision, RateLimiterBackend, Strategy};
pub use fixed_window::{FixedWindowCounter, FixedWindowReply};
pub use key::RateLimitKey;
pub use limiter::{FixedWindowLimiter, LimitConfig, SlidingWindowLimiter};
pub use sliding_log::SlidingLog;
