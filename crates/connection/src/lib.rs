//! Resilient connection manager.
//!
//! Establishes a long-lived, event-carrying connection through a
//! [`Transport`](tether_transport::Transport), retries the *initial*
//! handshake with its own exponential backoff, and once a session has been
//! live hands fault recovery over to the transport's native reconnection.

mod attempt;
pub mod backoff;
pub mod callbacks;
pub mod error;
pub mod machine;
pub mod manager;
pub mod timer;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use callbacks::{Callbacks, HookFuture};
pub use error::{ConfigError, ConnectionError};
pub use machine::{Machine, Transition, Trigger};
pub use manager::{ConnectionManager, ManagerOptions};
pub use timer::{TimerGuard, TimerKind};
pub use types::{
    ConnectionEvent, ConnectionState, DEFAULT_CONNECT_TIMEOUT, RetryConfig, RetryOverrides,
};
