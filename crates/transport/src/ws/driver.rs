//! Per-session driver: handshake, live pumps, native reconnection loop.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{WsOptions, WsShared};
use crate::constants::{WS_MAX_MESSAGE_SIZE, WS_OUTBOUND_BUFFER};
use crate::event::TransportEvent;
use crate::pumps::outbound::outbound_pump;
use crate::pumps::read::{SessionEnd, read_pump};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors while establishing a WebSocket connection.
#[derive(Debug, thiserror::Error)]
pub(crate) enum DialError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("invalid header {0}")]
    Header(String),
}

impl DialError {
    /// Maps a handshake failure onto the event the owner should see.
    fn into_event(self) -> TransportEvent {
        if let DialError::Ws(tungstenite::Error::Http(response)) = &self {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return TransportEvent::AuthError {
                    message: format!("handshake rejected with HTTP {status}"),
                };
            }
        }
        TransportEvent::Error {
            error: self.to_string(),
        }
    }
}

/// Runs one session from first handshake until it is closed or gives up.
pub(crate) async fn drive(
    url: String,
    opts: WsOptions,
    shared: Arc<WsShared>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let cancel = shared.cancel_token();

    let dialed = tokio::select! {
        _ = cancel.cancelled() => return,
        result = dial(&url, &opts) => result,
    };
    let mut stream = match dialed {
        Ok(s) => s,
        Err(e) => {
            warn!(url = %url, error = %e, "websocket handshake failed");
            let _ = events.send(e.into_event());
            return;
        }
    };

    info!(url = %url, "websocket connected");
    let mut announce = TransportEvent::Connect;

    loop {
        let end = serve(stream, announce, &opts, &shared, &events).await;

        if let Some(message) = end.auth_revoked.clone() {
            let _ = events.send(TransportEvent::AuthError { message });
        }
        let _ = events.send(TransportEvent::Disconnect {
            reason: end.reason.to_owned(),
        });
        info!(url = %url, reason = end.reason, "websocket disconnected");

        if cancel.is_cancelled() || !end.may_reconnect() || !opts.reconnection {
            return;
        }

        match reconnect_loop(&url, &opts, &cancel, &events).await {
            Some((s, attempt)) => {
                stream = s;
                announce = TransportEvent::Reconnect { attempt };
            }
            None => return,
        }
    }
}

/// Runs the pumps for one live connection and returns once it ends.
///
/// `announce` is sent after the session is marked connected, so the owner
/// never observes a connect event while [`Session::is_connected`] is false.
///
/// [`Session::is_connected`]: crate::Session::is_connected
async fn serve(
    stream: WsStream,
    announce: TransportEvent,
    opts: &WsOptions,
    shared: &WsShared,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> SessionEnd {
    let (write, read) = stream.split();
    let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(WS_OUTBOUND_BUFFER);
    let pumps = shared.cancel_token().child_token();

    let outbound = tokio::spawn(outbound_pump(
        write,
        write_rx,
        opts.ping_interval(),
        pumps.clone(),
    ));

    shared.mark_connected(write_tx.clone());
    let _ = events.send(announce);

    let end = read_pump(read, events, write_tx, opts.read_deadline(), pumps.clone()).await;

    shared.mark_disconnected();
    pumps.cancel();
    let _ = outbound.await;
    debug!(reason = end.reason, "websocket pumps stopped");
    end
}

/// Native reconnection with jittered exponential backoff.
///
/// Returns the new stream and the attempt that produced it, or `None` when
/// cancelled or out of attempts.
async fn reconnect_loop(
    url: &str,
    opts: &WsOptions,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<TransportEvent>,
) -> Option<(WsStream, u32)> {
    let mut attempt: u32 = 0;

    loop {
        attempt = attempt.saturating_add(1);
        if opts.reconnection_attempts > 0 && attempt > opts.reconnection_attempts {
            warn!(
                url = %url,
                attempts = opts.reconnection_attempts,
                "native reconnection exhausted"
            );
            let _ = events.send(TransportEvent::ReconnectFailed);
            return None;
        }

        let delay = opts.delay_for_attempt(attempt);
        info!(
            url = %url,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(url = %url, "reconnect cancelled");
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let _ = events.send(TransportEvent::ReconnectAttempt { attempt });

        let result = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = dial(url, opts) => result,
        };

        match result {
            Ok(stream) => {
                info!(url = %url, attempt, "reconnected");
                return Some((stream, attempt));
            }
            Err(e) => {
                warn!(url = %url, attempt, error = %e, "reconnect attempt failed");
                let _ = events.send(TransportEvent::ReconnectError {
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Opens the WebSocket, attaching credentials and extra headers.
async fn dial(url: &str, opts: &WsOptions) -> Result<WsStream, DialError> {
    let mut request = url.into_client_request()?;
    let headers = request.headers_mut();

    if let Some(token) = &opts.auth_token {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| DialError::Header(AUTHORIZATION.to_string()))?;
        headers.insert(AUTHORIZATION, value);
    }
    for (name, value) in &opts.headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| DialError::Header(name.clone()))?;
        let header_value =
            HeaderValue::from_str(value).map_err(|_| DialError::Header(name.clone()))?;
        headers.insert(header_name, header_value);
    }

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
    let (stream, _) =
        tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false).await?;
    Ok(stream)
}
