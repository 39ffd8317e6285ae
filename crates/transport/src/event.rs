//! Lifecycle events reported by a transport session.

use crate::constants::REASON_CLIENT_DISCONNECT;

/// Everything a transport can tell its owner.
///
/// The set is closed: a session delivers these over the channel returned
/// from [`Transport::open`](crate::Transport::open) and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed (also re-emitted by transports that re-accept a
    /// raw connection without a distinct reconnect event).
    Connect,
    /// The live connection went away.
    Disconnect { reason: String },
    /// Native reconnection is about to try again.
    ReconnectAttempt { attempt: u32 },
    /// Native reconnection succeeded on the given attempt.
    Reconnect { attempt: u32 },
    /// A native reconnection attempt failed.
    ReconnectError { error: String },
    /// Native reconnection gave up.
    ReconnectFailed,
    /// Transport-level error.
    Error { error: String },
    /// The remote rejected our credentials.
    AuthError { message: String },
    /// Application payload received on the live connection.
    Message { text: String },
}

impl TransportEvent {
    /// Short event name used in log fields.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::ReconnectAttempt { .. } => "reconnect_attempt",
            Self::Reconnect { .. } => "reconnect",
            Self::ReconnectError { .. } => "reconnect_error",
            Self::ReconnectFailed => "reconnect_failed",
            Self::Error { .. } => "error",
            Self::AuthError { .. } => "auth_error",
            Self::Message { .. } => "message",
        }
    }
}

/// Returns `true` if a disconnect reason means we closed the session ourselves.
pub fn is_manual_disconnect(reason: &str) -> bool {
    reason == REASON_CLIENT_DISCONNECT
}
