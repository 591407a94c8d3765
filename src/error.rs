//! Error types for the Wayfarer service.

use std::time::Duration;
use thiserror::Error;

/// Main error type for Wayfarer operations.
#[derive(Error, Debug)]
pub enum WayfarerError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The coordination store could not be reached or rejected the command
    #[error("Coordination store error: {0}")]
    Store(#[from] redis::RedisError),

    /// A store round trip exceeded the configured timeout
    #[error("Coordination store timed out after {0:?}")]
    StoreTimeout(Duration),

    /// The store handle was used after `close`
    #[error("Coordination store connection is closed")]
    StoreClosed,

    /// A limiter script returned something other than the expected shape
    #[error("Unexpected script reply: {0}")]
    UnexpectedReply(String),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WayfarerError {
    /// Whether this error came from the coordination store round trip.
    ///
    /// These are the errors the limiter facades absorb into their
    /// fail-open / fail-closed policies.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::Store(_) | Self::StoreTimeout(_) | Self::StoreClosed | Self::UnexpectedReply(_)
        )
    }
}

/// Result type alias for Wayfarer operations.
pub type Result<T> = std::result::Result<T, WayfarerError>;
