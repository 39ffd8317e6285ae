//! WebSocket transport with built-in reconnection.
//!
//! [`WsTransport::open`] spawns a driver task per session. The driver
//! performs the handshake, runs the read/write/ping pumps while the
//! connection is live, and after an unexpected loss reconnects on its own
//! with jittered exponential backoff, reporting every step as a
//! [`TransportEvent`].

mod driver;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::event::TransportEvent;
use crate::session::{Opened, SendError, Session, Transport, TransportOptions};

/// Options understood by [`WsTransport`], parsed from [`TransportOptions`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WsOptions {
    /// Reconnect natively after an unexpected disconnect.
    pub reconnection: bool,
    /// Native reconnection budget; `0` means unlimited.
    pub reconnection_attempts: u32,
    /// Base delay between native reconnection attempts.
    pub reconnection_delay_ms: u64,
    /// Cap on the native reconnection delay.
    pub reconnection_delay_max_ms: u64,
    /// Relative jitter applied to each delay, in `[0, 1]`.
    pub randomization_factor: f64,
    /// Sent as `Authorization: Bearer <token>` on every handshake.
    pub auth_token: Option<String>,
    /// Extra handshake request headers.
    pub headers: HashMap<String, String>,
    /// Keepalive ping period.
    pub ping_interval_ms: u64,
    /// Read deadline; any incoming frame resets it.
    pub ping_timeout_ms: u64,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            reconnection: true,
            reconnection_attempts: 0,
            reconnection_delay_ms: 1_000,
            reconnection_delay_max_ms: 5_000,
            randomization_factor: 0.5,
            auth_token: None,
            headers: HashMap::new(),
            ping_interval_ms: 25_000,
            ping_timeout_ms: 20_000,
        }
    }
}

impl WsOptions {
    /// Parses the keys this transport understands; unknown keys are ignored.
    pub fn from_transport_options(options: &TransportOptions) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(options.clone()))
    }

    /// Delay before native reconnection attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let base = self.reconnection_delay_ms as f64 * 2f64.powi(exp);
        let factor = self.randomization_factor.clamp(0.0, 1.0);
        let jittered = if factor > 0.0 {
            let offset: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
            base + base * factor * offset
        } else {
            base
        };
        let capped = jittered.max(0.0).min(self.reconnection_delay_max_ms as f64);
        Duration::from_millis(capped as u64)
    }

    pub(crate) fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    /// The read deadline covers one full ping round.
    pub(crate) fn read_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.saturating_add(self.ping_timeout_ms).max(1))
    }
}

/// WebSocket [`Transport`] built on `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, options: &TransportOptions) -> Opened {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(WsShared::default());
        let session = WsSession {
            id: uuid::Uuid::new_v4().to_string(),
            shared: shared.clone(),
        };
        debug!(session = %session.id, url = %url, "opening websocket session");

        match WsOptions::from_transport_options(options) {
            Ok(opts) => {
                tokio::spawn(driver::drive(url.to_owned(), opts, shared, events_tx));
            }
            Err(e) => {
                let _ = events_tx.send(TransportEvent::Error {
                    error: format!("invalid transport options: {e}"),
                });
            }
        }

        Opened {
            session: Arc::new(session),
            events: events_rx,
        }
    }
}

/// State shared between a [`WsSession`] handle and its driver task.
#[derive(Default)]
pub(crate) struct WsShared {
    connected: AtomicBool,
    cancel: CancellationToken,
    outbound: Mutex<Option<mpsc::Sender<tungstenite::Message>>>,
}

impl WsShared {
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn mark_connected(&self, outbound: mpsc::Sender<tungstenite::Message>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
        self.connected.store(true, Ordering::SeqCst);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Handle to one WebSocket session.
pub struct WsSession {
    id: String,
    shared: Arc<WsShared>,
}

impl Session for WsSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn send(&self, text: String) -> Result<(), SendError> {
        if self.shared.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        let guard = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = guard.as_ref().ok_or(SendError::NotConnected)?;
        tx.try_send(tungstenite::Message::Text(text.into()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SendError::Full,
                mpsc::error::TrySendError::Closed(_) => SendError::Closed,
            })
    }

    fn close(&self) {
        if !self.shared.cancel.is_cancelled() {
            debug!(session = %self.id, "closing websocket session");
        }
        self.shared.cancel.cancel();
        self.shared.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}
