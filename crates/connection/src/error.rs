//! Error types for the connection manager.

use std::time::Duration;

/// Why an attempt, or a whole attempt sequence, failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connection timed out after {}ms", .0.as_millis())]
    ConnectionTimeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("failed to connect after {attempts} attempts")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<ConnectionError>,
    },
}

impl ConnectionError {
    /// Returns `true` for credential rejections.
    pub fn is_authentication(&self) -> bool {
        match self {
            Self::Authentication(_) => true,
            Self::RetryExhausted { last, .. } => last.is_authentication(),
            _ => false,
        }
    }
}

/// Invalid manager configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("max_initial_attempts must be at least 1")]
    NoAttempts,

    #[error("initial_delay must be greater than zero")]
    ZeroInitialDelay,

    #[error("max_delay ({max:?}) must not be below initial_delay ({initial:?})")]
    MaxBelowInitial { initial: Duration, max: Duration },

    #[error("backoff_multiplier must be greater than 1 (got {0})")]
    Multiplier(f64),

    #[error("connect_timeout must be greater than zero")]
    ZeroConnectTimeout,

    #[error("url must not be empty")]
    EmptyUrl,
}
