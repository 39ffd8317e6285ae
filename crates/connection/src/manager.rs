//! Public facade over the attempt sequence and the live session.
//!
//! The manager owns the initial connection: it runs attempts with its own
//! backoff until one succeeds or the budget is spent. After the first
//! success it never retries on its own; drops are left to the transport's
//! native reconnection and only observed here.
//!
//! All bookkeeping sits behind one lock that is never held across an
//! await. Every attempt sequence and live session carries a generation
//! number, and work belonging to an older generation is discarded.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tether_transport::{
    SendError, Session, Transport, TransportEvent, TransportOptions, is_manual_disconnect,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attempt::{self, AttemptParams, Established};
use crate::backoff;
use crate::callbacks::Callbacks;
use crate::error::{ConfigError, ConnectionError};
use crate::machine::{Machine, Transition, Trigger};
use crate::timer::TimerGuard;
use crate::types::{
    ConnectionEvent, ConnectionState, DEFAULT_CONNECT_TIMEOUT, RetryConfig, RetryOverrides,
};

const EVENT_BUFFER: usize = 64;

/// Everything the manager needs to know up front.
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub url: String,
    /// Passed to the transport untouched.
    pub transport_options: TransportOptions,
    pub retry: RetryConfig,
    /// Deadline for a single attempt's handshake.
    pub connect_timeout: Duration,
}

impl ManagerOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            transport_options: TransportOptions::new(),
            retry: RetryConfig::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_retry_overrides(mut self, overrides: &RetryOverrides) -> Self {
        self.retry = self.retry.with_overrides(overrides);
        self
    }

    pub fn with_transport_options(mut self, options: TransportOptions) -> Self {
        self.transport_options = options;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        self.retry.validate()?;
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        Ok(())
    }
}

/// How an attempt sequence ended.
enum Outcome {
    Connected,
    /// Superseded by a disconnect or a newer sequence.
    Cancelled,
    Exhausted(ConnectionError),
}

struct LiveSession {
    handle: Arc<dyn Session>,
    generation: u64,
    monitor: Option<JoinHandle<()>>,
}

impl LiveSession {
    fn teardown(self) {
        if let Some(monitor) = self.monitor {
            monitor.abort();
        }
        self.handle.close();
    }
}

struct Inner {
    machine: Machine,
    session: Option<LiveSession>,
    /// Session of the attempt in flight, until it connects or fails.
    pending: Option<Arc<dyn Session>>,
    /// Cancels the running attempt sequence, if any.
    sequence: Option<CancellationToken>,
    generation: u64,
}

impl Inner {
    fn owns(&self, generation: u64, token: &CancellationToken) -> bool {
        self.generation == generation && !token.is_cancelled()
    }

    fn is_current(&self, generation: u64) -> bool {
        self.session
            .as_ref()
            .is_some_and(|live| live.generation == generation)
    }
}

/// Event from a session that has since been replaced or torn down.
struct Stale;

struct Shared {
    options: ManagerOptions,
    transport: Arc<dyn Transport>,
    callbacks: Callbacks,
    timers: TimerGuard,
    inner: Mutex<Inner>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn url(&self) -> &str {
        &self.options.url
    }

    /// Feeds the machine and publishes real state changes.
    fn apply(&self, inner: &mut Inner, trigger: Trigger) -> Option<Transition> {
        let transition = inner.machine.apply(trigger)?;
        if transition.changed() {
            debug!(
                url = self.url(),
                from = %transition.from,
                to = %transition.to,
                "connection state changed"
            );
            let _ = self.events_tx.try_send(ConnectionEvent::StateChanged {
                from: transition.from,
                to: transition.to,
            });
        }
        Some(transition)
    }

    /// Stops the running sequence, every timer and the current session.
    fn teardown(&self, inner: &mut Inner) {
        if let Some(token) = inner.sequence.take() {
            token.cancel();
        }
        self.timers.cancel_all();
        if let Some(pending) = inner.pending.take() {
            debug!(session = pending.id(), "closing in-flight attempt");
            pending.close();
        }
        if let Some(live) = inner.session.take() {
            debug!(session = live.handle.id(), "closing session");
            live.teardown();
        }
        inner.generation += 1;
    }

    /// Starts a new sequence unless one is running or we are connected.
    fn start(&self) -> Option<(CancellationToken, u64)> {
        let mut inner = self.lock();
        match inner.machine.state() {
            ConnectionState::Connected => {
                debug!(url = self.url(), "already connected");
                return None;
            }
            state if state.is_in_progress() => {
                debug!(url = self.url(), "connection attempt already in progress");
                return None;
            }
            _ => {}
        }
        self.begin(&mut inner)
    }

    fn begin(&self, inner: &mut Inner) -> Option<(CancellationToken, u64)> {
        self.apply(inner, Trigger::Connect)?;
        // Drops a handle left behind by a dropped or abandoned session.
        self.teardown(inner);
        let token = CancellationToken::new();
        inner.sequence = Some(token.clone());
        Some((token, inner.generation))
    }

    async fn run_sequence(
        self: &Arc<Self>,
        token: CancellationToken,
        generation: u64,
    ) -> Outcome {
        let url = self.url();
        let max_attempts = self.options.retry.max_initial_attempts;

        loop {
            let (number, implicit_reconnect) = {
                let mut inner = self.lock();
                if !inner.owns(generation, &token) {
                    return Outcome::Cancelled;
                }
                self.apply(&mut inner, Trigger::AttemptStarted);
                (
                    inner.machine.attempts() + 1,
                    inner.machine.has_connected_once(),
                )
            };
            info!(url, attempt = number, max_attempts, "connecting");

            let opened = self.transport.open(url, &self.options.transport_options);
            {
                let mut inner = self.lock();
                if !inner.owns(generation, &token) {
                    drop(inner);
                    opened.session.close();
                    return Outcome::Cancelled;
                }
                inner.pending = Some(Arc::clone(&opened.session));
            }

            let params = AttemptParams {
                url,
                timeout: self.options.connect_timeout,
                implicit_reconnect,
            };
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Outcome::Cancelled,
                result = attempt::attempt(
                    opened,
                    params,
                    &self.timers,
                    &self.callbacks,
                ) => result,
            };

            let err = match result {
                Ok(established) => return self.commit(established, &token, generation).await,
                Err(err) => err,
            };

            let delay = {
                let mut inner = self.lock();
                if !inner.owns(generation, &token) {
                    return Outcome::Cancelled;
                }
                inner.pending = None;
                let Some(transition) = self.apply(&mut inner, Trigger::AttemptFailed) else {
                    return Outcome::Cancelled;
                };
                let failed = inner.machine.attempts();
                warn!(url, attempt = failed, max_attempts, error = %err, "connection attempt failed");

                if transition.to == ConnectionState::Failed {
                    inner.sequence = None;
                    self.timers.cancel_all();
                    None
                } else {
                    Some(backoff::next_delay(failed - 1, &self.options.retry))
                }
            };

            let Some(delay) = delay else {
                error!(url, attempts = max_attempts, "giving up on initial connection");
                let exhausted = ConnectionError::RetryExhausted {
                    attempts: max_attempts,
                    last: Box::new(err),
                };
                let _ = self.events_tx.try_send(ConnectionEvent::Exhausted {
                    attempts: max_attempts,
                });
                self.callbacks.error(&exhausted);
                return Outcome::Exhausted(exhausted);
            };

            info!(url, delay_ms = delay.as_millis() as u64, "retrying after delay");
            if self.timers.sleep(delay, &token).await.is_err() {
                return Outcome::Cancelled;
            }
        }
    }

    /// Installs a successful attempt as the live session.
    async fn commit(
        self: &Arc<Self>,
        established: Established,
        token: &CancellationToken,
        generation: u64,
    ) -> Outcome {
        let Established { session, events } = established;
        {
            let mut inner = self.lock();
            if !inner.owns(generation, token) {
                drop(inner);
                session.close();
                return Outcome::Cancelled;
            }
            self.apply(&mut inner, Trigger::AttemptSucceeded);
            self.timers.cancel_all();
            inner.sequence = None;
            inner.pending = None;
            let live = LiveSession {
                handle: session.clone(),
                generation,
                monitor: None,
            };
            if let Some(previous) = inner.session.replace(live) {
                previous.teardown();
            }
        }
        info!(url = self.url(), session = session.id(), "connected");

        // A recovery has already run on_reconnect(0) inside the attempt.
        self.callbacks.connected().await;

        let mut inner = self.lock();
        match inner.session.as_mut() {
            Some(live) if live.generation == generation => {
                live.monitor = Some(tokio::spawn(Arc::clone(self).monitor(events, generation)));
                Outcome::Connected
            }
            _ => {
                debug!(url = self.url(), "session replaced before monitoring started");
                Outcome::Cancelled
            }
        }
    }

    fn session_step(&self, generation: u64, trigger: Trigger) -> Result<Option<Transition>, Stale> {
        let mut inner = self.lock();
        if !inner.is_current(generation) {
            return Err(Stale);
        }
        Ok(self.apply(&mut inner, trigger))
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock().is_current(generation)
    }

    /// Observes the live session until it is replaced or its stream ends.
    async fn monitor(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        generation: u64,
    ) {
        let url = self.url();

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Disconnect { reason } => {
                    let manual = is_manual_disconnect(&reason);
                    let Ok(step) =
                        self.session_step(generation, Trigger::TransportDisconnect { manual })
                    else {
                        break;
                    };
                    info!(url, reason = %reason, manual, "disconnected");
                    self.callbacks.disconnected(&reason);
                    if !manual && step.is_some() {
                        info!(url, "leaving recovery to transport");
                    }
                }
                TransportEvent::Reconnect { attempt } => {
                    let Ok(step) = self.session_step(generation, Trigger::TransportReconnect)
                    else {
                        break;
                    };
                    if step.is_none() {
                        warn!(url, attempt, "reconnect reported in a state that cannot accept it");
                        continue;
                    }
                    info!(url, attempt, "reconnected");
                    self.callbacks.reconnected(attempt).await;
                }
                TransportEvent::Connect => {
                    let Ok(step) = self.session_step(generation, Trigger::TransportConnect) else {
                        break;
                    };
                    if step.is_none() {
                        warn!(url, "connect reported in a state that cannot accept it");
                        continue;
                    }
                    info!(url, "connect after earlier session, treating as reconnection");
                    self.callbacks.reconnected(0).await;
                }
                TransportEvent::ReconnectAttempt { attempt } => {
                    debug!(url, attempt, "transport reconnect attempt");
                }
                TransportEvent::ReconnectError { error } => {
                    warn!(url, error = %error, "transport reconnect attempt failed");
                }
                TransportEvent::ReconnectFailed => {
                    if self
                        .session_step(generation, Trigger::ReconnectFailed)
                        .is_err()
                    {
                        break;
                    }
                    error!(url, "transport gave up reconnecting");
                }
                TransportEvent::Error { error } => {
                    if !self.is_current(generation) {
                        break;
                    }
                    error!(url, error = %error, "connection error");
                    self.callbacks.error(&ConnectionError::Transport(error));
                }
                TransportEvent::AuthError { message } => {
                    if !self.is_current(generation) {
                        break;
                    }
                    error!(url, message = %message, "authentication rejected");
                    self.callbacks
                        .error(&ConnectionError::Authentication(message));
                }
                TransportEvent::Message { text } => {
                    if !self.is_current(generation) {
                        break;
                    }
                    self.callbacks.message(&text);
                }
            }
        }
        debug!(url, "transport event stream ended");
    }
}

/// Resilient connection to one endpoint.
///
/// Cheap to clone; clones share the same connection. Call
/// [`disconnect`](Self::disconnect) to release the session and background
/// tasks.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.shared.options.url)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        options: ManagerOptions,
        transport: Arc<dyn Transport>,
        callbacks: Callbacks,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let machine = Machine::new(options.retry.max_initial_attempts);

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                transport,
                callbacks,
                timers: TimerGuard::new(),
                inner: Mutex::new(Inner {
                    machine,
                    session: None,
                    pending: None,
                    sequence: None,
                    generation: 0,
                }),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        })
    }

    /// Takes the event receiver. Returns `None` after the first call.
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.shared
            .events_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Starts the attempt sequence in the background.
    ///
    /// No-op while connected or while a sequence is already running.
    pub async fn connect(&self) {
        if let Some((token, generation)) = self.shared.start() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared.run_sequence(token, generation).await;
            });
        }
    }

    /// Like [`connect`](Self::connect) but waits for the sequence to end.
    ///
    /// Returns the current state without waiting if nothing was started,
    /// and [`ConnectionState::Disconnected`] (or whatever followed) if the
    /// sequence was cancelled by a disconnect.
    pub async fn connect_and_wait(&self) -> Result<ConnectionState, ConnectionError> {
        let Some((token, generation)) = self.shared.start() else {
            return Ok(self.connection_state());
        };
        let shared = Arc::clone(&self.shared);
        let outcome =
            tokio::spawn(async move { shared.run_sequence(token, generation).await }).await;

        match outcome {
            Ok(Outcome::Connected) => Ok(ConnectionState::Connected),
            Ok(Outcome::Cancelled) => Ok(self.connection_state()),
            Ok(Outcome::Exhausted(err)) => Err(err),
            Err(join) => Err(ConnectionError::Transport(format!(
                "attempt sequence aborted: {join}"
            ))),
        }
    }

    /// Cancels any pending attempt or delay and closes the session.
    ///
    /// Once this returns no earlier timer or attempt can change the state.
    pub async fn disconnect(&self) {
        let mut inner = self.shared.lock();
        info!(url = self.shared.url(), state = %inner.machine.state(), "disconnecting");
        self.shared.teardown(&mut inner);
        self.shared.apply(&mut inner, Trigger::Disconnect);
    }

    /// Forgets the earlier session and runs a fresh attempt sequence.
    ///
    /// No-op while connected or while a sequence is already running.
    pub async fn reconnect(&self) {
        let started = {
            let mut inner = self.shared.lock();
            let state = inner.machine.state();
            if state == ConnectionState::Connected || state.is_in_progress() {
                debug!(url = self.shared.url(), %state, "reconnect ignored");
                return;
            }
            info!(url = self.shared.url(), "reconnecting from scratch");
            self.shared.teardown(&mut inner);
            self.shared.apply(&mut inner, Trigger::Reconnect);
            self.shared.begin(&mut inner)
        };

        if let Some((token, generation)) = started {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared.run_sequence(token, generation).await;
            });
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.lock().machine.state()
    }

    /// Connected according to both the manager and the transport.
    pub fn is_connected(&self) -> bool {
        let inner = self.shared.lock();
        inner.machine.state() == ConnectionState::Connected
            && inner
                .session
                .as_ref()
                .is_some_and(|live| live.handle.is_connected())
    }

    /// Handle of the live session, if any.
    pub fn session(&self) -> Option<Arc<dyn Session>> {
        self.shared
            .lock()
            .session
            .as_ref()
            .map(|live| live.handle.clone())
    }

    /// Sends a text message on the live session.
    pub fn send(&self, text: impl Into<String>) -> Result<(), SendError> {
        let handle = {
            let inner = self.shared.lock();
            if inner.machine.state() != ConnectionState::Connected {
                return Err(SendError::NotConnected);
            }
            inner.session.as_ref().map(|live| live.handle.clone())
        };
        match handle {
            Some(handle) => handle.send(text.into()),
            None => Err(SendError::NotConnected),
        }
    }

    pub fn url(&self) -> &str {
        self.shared.url()
    }

    pub fn has_connected_once(&self) -> bool {
        self.shared.lock().machine.has_connected_once()
    }

    /// Failed attempts in the current sequence.
    pub fn attempt_count(&self) -> u32 {
        self.shared.lock().machine.attempts()
    }

    pub fn pending_timers(&self) -> usize {
        self.shared.timers.pending()
    }
}
