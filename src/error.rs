//! Error types for the Turnstile crate.

use thiserror::Error;

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reported by a counter store.
///
/// Strategies never surface these to callers; an increment failure is
/// answered by admitting the request.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or refused the command
    #[error("Counter store unavailable: {0}")]
    Unavailable(String),

    /// Redis client errors
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
