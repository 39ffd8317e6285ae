//! The seam between the connection manager and a concrete transport.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::event::TransportEvent;

/// Opaque options handed through to the transport unchanged.
///
/// Each transport picks out the keys it understands.
pub type TransportOptions = serde_json::Map<String, serde_json::Value>;

/// Errors from [`Session::send`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("session is not connected")]
    NotConnected,

    #[error("outbound queue is full")]
    Full,

    #[error("session closed")]
    Closed,
}

/// A live (or connecting) transport session.
pub trait Session: Send + Sync {
    /// Unique identifier of this session.
    fn id(&self) -> &str;

    /// Whether the transport itself believes the connection is up.
    fn is_connected(&self) -> bool;

    /// Queues an application message on the connection.
    fn send(&self, text: String) -> Result<(), SendError>;

    /// Shuts the session down. Idempotent; stops native reconnection too.
    fn close(&self);
}

/// A freshly opened session and the receiving end of its event channel.
///
/// Dropping `events` detaches the owner: the transport keeps running until
/// [`Session::close`] but nobody observes it anymore.
pub struct Opened {
    pub session: Arc<dyn Session>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Factory for sessions.
///
/// `open` returns immediately; the handshake runs in the background and
/// reports its outcome as the first terminal event on `events`.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str, options: &TransportOptions) -> Opened;
}
