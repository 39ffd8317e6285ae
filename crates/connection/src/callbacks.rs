//! Owner-supplied lifecycle hooks.
//!
//! `on_connect` and `on_reconnect` are async and awaited before the manager
//! moves on; the rest are plain notifications.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ConnectionError;

/// Boxed future returned by async hooks.
pub type HookFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type ConnectHook = Arc<dyn Fn() -> HookFuture + Send + Sync>;
type ReconnectHook = Arc<dyn Fn(u32) -> HookFuture + Send + Sync>;
type DisconnectHook = Arc<dyn Fn(&str) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&ConnectionError) + Send + Sync>;
type MessageHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Hooks the manager calls on lifecycle changes. Every hook is optional.
///
/// ```ignore
/// let callbacks = Callbacks::new()
///     .on_connect(|| async { tracing::info!("up") })
///     .on_disconnect(|reason| tracing::warn!(reason, "down"));
/// ```
#[derive(Clone, Default)]
pub struct Callbacks {
    on_connect: Option<ConnectHook>,
    on_reconnect: Option<ReconnectHook>,
    on_disconnect: Option<DisconnectHook>,
    on_error: Option<ErrorHook>,
    on_message: Option<MessageHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Awaited once after each owned attempt sequence succeeds.
    pub fn on_connect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move || Box::pin(hook())));
        self
    }

    /// Awaited on every transport-driven recovery. The argument is the
    /// transport's reconnect attempt number, or 0 for an implicit one.
    pub fn on_reconnect<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_reconnect = Some(Arc::new(move |attempt| Box::pin(hook(attempt))));
        self
    }

    pub fn on_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ConnectionError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    /// Inbound text frames from the live session.
    pub fn on_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(hook));
        self
    }

    pub(crate) async fn connected(&self) {
        if let Some(hook) = &self.on_connect {
            hook().await;
        }
    }

    pub(crate) async fn reconnected(&self, attempt: u32) {
        if let Some(hook) = &self.on_reconnect {
            hook(attempt).await;
        }
    }

    pub(crate) fn disconnected(&self, reason: &str) {
        if let Some(hook) = &self.on_disconnect {
            hook(reason);
        }
    }

    pub(crate) fn error(&self, error: &ConnectionError) {
        if let Some(hook) = &self.on_error {
            hook(error);
        }
    }

    pub(crate) fn message(&self, text: &str) {
        if let Some(hook) = &self.on_message {
            hook(text);
        }
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_reconnect", &self.on_reconnect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn unset_hooks_are_noops() {
        let callbacks = Callbacks::new();
        callbacks.connected().await;
        callbacks.reconnected(3).await;
        callbacks.disconnected("transport close");
        callbacks.error(&ConnectionError::Transport("x".into()));
        callbacks.message("hi");
        assert_eq!(
            format!("{callbacks:?}"),
            "Callbacks { on_connect: false, on_reconnect: false, on_disconnect: false, on_error: false, on_message: false }"
        );
    }

    #[tokio::test]
    async fn hooks_receive_arguments() {
        let connects = Arc::new(AtomicU32::new(0));
        let reconnects = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));

        let c = connects.clone();
        let r = reconnects.clone();
        let d = seen.clone();
        let e = seen.clone();
        let m = seen.clone();
        let callbacks = Callbacks::new()
            .on_connect(move || {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .on_reconnect(move |attempt| {
                let r = r.clone();
                async move {
                    r.lock().unwrap().push(attempt);
                }
            })
            .on_disconnect(move |reason| d.lock().unwrap().push(format!("disconnect:{reason}")))
            .on_error(move |err| e.lock().unwrap().push(format!("error:{err}")))
            .on_message(move |text| m.lock().unwrap().push(format!("message:{text}")));

        callbacks.connected().await;
        callbacks.clone().reconnected(2).await;
        callbacks.reconnected(0).await;
        callbacks.disconnected("ping timeout");
        callbacks.error(&ConnectionError::Authentication("nope".into()));
        callbacks.message("hello");

        assert_eq!(connects.load(Ordering::SeqCst), 1);
        assert_eq!(*reconnects.lock().unwrap(), vec![2, 0]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "disconnect:ping timeout",
                "error:authentication failed: nope",
                "message:hello"
            ]
        );
    }
}
