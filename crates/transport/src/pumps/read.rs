//! WebSocket read pump: turns incoming frames into transport events.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::constants::{
    REASON_CLIENT_DISCONNECT, REASON_PING_TIMEOUT, REASON_SERVER_DISCONNECT,
    REASON_TRANSPORT_CLOSE, REASON_TRANSPORT_ERROR, WS_CLOSE_AUTH_REVOKED,
};
use crate::event::TransportEvent;

/// Why a live connection stopped being read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SessionEnd {
    pub(crate) reason: &'static str,
    /// Set when the server revoked our credentials in its close frame.
    pub(crate) auth_revoked: Option<String>,
}

impl SessionEnd {
    fn new(reason: &'static str) -> Self {
        Self {
            reason,
            auth_revoked: None,
        }
    }

    /// Only unexpected losses are recovered by native reconnection.
    pub(crate) fn may_reconnect(&self) -> bool {
        self.reason != REASON_CLIENT_DISCONNECT && self.reason != REASON_SERVER_DISCONNECT
    }
}

/// Reads frames until the connection ends and reports why.
///
/// Any incoming frame resets the read deadline; if nothing arrives within
/// `read_deadline` the connection is considered dead.
pub(crate) async fn read_pump<S>(
    mut read: S,
    events: &mpsc::UnboundedSender<TransportEvent>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    read_deadline: Duration,
    cancel: CancellationToken,
) -> SessionEnd
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(read_deadline);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::new(REASON_CLIENT_DISCONNECT),

            () = &mut deadline => {
                warn!("read deadline elapsed, connection considered dead");
                return SessionEnd::new(REASON_PING_TIMEOUT);
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        return SessionEnd::new(REASON_TRANSPORT_ERROR);
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return SessionEnd::new(REASON_TRANSPORT_CLOSE);
                    }
                };

                deadline.as_mut().reset(tokio::time::Instant::now() + read_deadline);

                match msg {
                    tungstenite::Message::Text(text) => {
                        let _ = events.send(TransportEvent::Message {
                            text: text.as_str().to_owned(),
                        });
                    }
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                    }
                    tungstenite::Message::Pong(_) => trace!("received pong"),
                    tungstenite::Message::Close(frame) => {
                        let mut end = SessionEnd::new(REASON_SERVER_DISCONNECT);
                        if let Some(f) = frame
                            && u16::from(f.code) == WS_CLOSE_AUTH_REVOKED
                        {
                            debug!("server revoked credentials (close code {WS_CLOSE_AUTH_REVOKED})");
                            end.auth_revoked = Some(f.reason.as_str().to_owned());
                        }
                        debug!("received close frame");
                        return end;
                    }
                    _ => trace!("ignoring binary frame"),
                }
            }
        }
    }
}
