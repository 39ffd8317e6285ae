//! One owned connection attempt, raced against its deadline.

use std::sync::Arc;
use std::time::Duration;

use tether_transport::{Opened, Session, TransportEvent};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::callbacks::Callbacks;
use crate::error::ConnectionError;
use crate::timer::TimerGuard;

/// A session whose handshake completed within the deadline.
pub(crate) struct Established {
    pub session: Arc<dyn Session>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Closes the session when dropped unless released.
struct PendingSession(Option<Arc<dyn Session>>);

impl PendingSession {
    fn release(mut self) -> Option<Arc<dyn Session>> {
        self.0.take()
    }
}

impl Drop for PendingSession {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            debug!(session = session.id(), "closing abandoned session");
            session.close();
        }
    }
}

pub(crate) struct AttemptParams<'a> {
    pub url: &'a str,
    pub timeout: Duration,
    /// A connect here counts as a recovery of an earlier session.
    pub implicit_reconnect: bool,
}

/// Waits for the first decisive event on a freshly opened session.
///
/// Whatever the outcome, the deadline is cleared and a session that is not
/// handed back is closed, including when this future is dropped midway.
pub(crate) async fn attempt(
    opened: Opened,
    params: AttemptParams<'_>,
    timers: &TimerGuard,
    callbacks: &Callbacks,
) -> Result<Established, ConnectionError> {
    let Opened {
        session,
        mut events,
    } = opened;
    trace!(session = session.id(), "waiting for handshake");
    let pending = PendingSession(Some(session));
    let mut deadline = timers.deadline(params.timeout);

    loop {
        tokio::select! {
            biased;

            _ = deadline.expired() => {
                error!(
                    url = params.url,
                    timeout_ms = params.timeout.as_millis() as u64,
                    "connection attempt timed out"
                );
                return Err(ConnectionError::ConnectionTimeout(params.timeout));
            }

            event = events.recv() => match event {
                Some(TransportEvent::Connect) => {
                    deadline.disarm();
                    if params.implicit_reconnect {
                        info!(url = params.url, "connect after earlier session, treating as reconnection");
                        callbacks.reconnected(0).await;
                    }
                    let Some(session) = pending.release() else {
                        return Err(ConnectionError::Transport("session released twice".into()));
                    };
                    return Ok(Established { session, events });
                }
                Some(TransportEvent::Error { error }) => {
                    error!(url = params.url, error = %error, "connection error");
                    let err = ConnectionError::Transport(error);
                    callbacks.error(&err);
                    return Err(err);
                }
                Some(TransportEvent::AuthError { message }) => {
                    error!(url = params.url, message = %message, "authentication rejected");
                    return Err(ConnectionError::Authentication(message));
                }
                Some(TransportEvent::Disconnect { reason }) => {
                    return Err(ConnectionError::Transport(format!(
                        "disconnected before handshake: {reason}"
                    )));
                }
                Some(other) => {
                    trace!(event = other.name(), "ignoring event before handshake");
                }
                None => {
                    return Err(ConnectionError::Transport(
                        "transport closed before handshake".into(),
                    ));
                }
            }
        }
    }
}
