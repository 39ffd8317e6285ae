use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// How long a single attempt may wait for the transport handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Connection lifecycle as observed by the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Retrying,
    Connected,
    Failed,
}

impl ConnectionState {
    /// An owned attempt sequence is running.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Connecting | Self::Retrying)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Retrying => "retrying",
            Self::Connected => "connected",
            Self::Failed => "failed",
        })
    }
}

/// Emitted on the manager's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// The initial attempt budget ran out.
    Exhausted { attempts: u32 },
}

/// Backoff policy for the initial attempt sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_initial_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_initial_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(15000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Replaces every field the overrides set.
    pub fn with_overrides(mut self, overrides: &RetryOverrides) -> Self {
        if let Some(n) = overrides.max_initial_attempts {
            self.max_initial_attempts = n;
        }
        if let Some(ms) = overrides.initial_delay_ms {
            self.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = overrides.max_delay_ms {
            self.max_delay = Duration::from_millis(ms);
        }
        if let Some(m) = overrides.backoff_multiplier {
            self.backoff_multiplier = m;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_initial_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.initial_delay.is_zero() {
            return Err(ConfigError::ZeroInitialDelay);
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::MaxBelowInitial {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }
        // Rejects NaN as well.
        if !(self.backoff_multiplier > 1.0) || !self.backoff_multiplier.is_finite() {
            return Err(ConfigError::Multiplier(self.backoff_multiplier));
        }
        Ok(())
    }
}

/// Partial [`RetryConfig`], as it appears in configuration files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_initial_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
}
