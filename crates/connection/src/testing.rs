//! Scripted in-memory transport for manager tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tether_transport::{Opened, SendError, Session, Transport, TransportEvent, TransportOptions};
use tokio::sync::mpsc;

/// What a freshly opened session does.
#[derive(Debug, Clone)]
pub(crate) enum Script {
    Connect,
    ConnectAfter(Duration),
    Fail(&'static str),
    AuthReject(&'static str),
    Hang,
}

pub(crate) struct MockTransport {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    sessions: Mutex<Vec<Arc<MockSession>>>,
}

impl MockTransport {
    /// Plays `scripts` in order, then refuses every further open.
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Self::with_fallback(scripts, Script::Fail("connection refused"))
    }

    /// Refuses every open.
    pub fn refusing() -> Arc<Self> {
        Self::new(Vec::new())
    }

    /// Sessions never answer unless a test emits events on them.
    pub fn silent() -> Arc<Self> {
        Self::with_fallback(Vec::new(), Script::Hang)
    }

    pub fn with_fallback(scripts: impl IntoIterator<Item = Script>, fallback: Script) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            fallback,
            sessions: Mutex::new(Vec::new()),
        })
    }

    pub fn opened(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn last_session(&self) -> Arc<MockSession> {
        let sessions = self.sessions.lock().unwrap();
        sessions[sessions.len() - 1].clone()
    }
}

impl Transport for MockTransport {
    fn open(&self, _url: &str, _options: &TransportOptions) -> Opened {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(MockSession {
            id: uuid::Uuid::new_v4().to_string(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: tx,
            sent: Mutex::new(Vec::new()),
        });
        self.sessions.lock().unwrap().push(session.clone());

        match script {
            Script::Connect => session.emit(TransportEvent::Connect),
            Script::ConnectAfter(delay) => {
                let s = session.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    s.emit(TransportEvent::Connect);
                });
            }
            Script::Fail(error) => session.emit(TransportEvent::Error {
                error: error.into(),
            }),
            Script::AuthReject(message) => session.emit(TransportEvent::AuthError {
                message: message.into(),
            }),
            Script::Hang => {}
        }

        Opened {
            session,
            events: rx,
        }
    }
}

pub(crate) struct MockSession {
    id: String,
    connected: AtomicBool,
    closed: AtomicBool,
    events: mpsc::UnboundedSender<TransportEvent>,
    sent: Mutex<Vec<String>>,
}

impl MockSession {
    /// Delivers `event` to whoever holds the event stream. Connection flags
    /// follow the event unless the session was closed.
    pub fn emit(&self, event: TransportEvent) {
        if !self.is_closed() {
            match &event {
                TransportEvent::Connect | TransportEvent::Reconnect { .. } => {
                    self.connected.store(true, Ordering::SeqCst)
                }
                TransportEvent::Disconnect { .. } | TransportEvent::ReconnectFailed => {
                    self.connected.store(false, Ordering::SeqCst)
                }
                _ => {}
            }
        }
        let _ = self.events.send(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Session for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn send(&self, text: String) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        if !self.is_connected() {
            return Err(SendError::NotConnected);
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}
