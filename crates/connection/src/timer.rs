//! Owner of every pending timer in an attempt sequence.
//!
//! Holds at most one backoff delay and one attempt deadline. After
//! [`TimerGuard::cancel_all`] returns, no previously armed callback runs:
//! firing and cancelling serialize on the same lock, and a timer only fires
//! if it is still the one registered in its slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Backoff wait between attempts.
    Delay,
    /// Per-attempt handshake deadline.
    Deadline,
}

/// A wait that ended because its timer was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timer cancelled")]
pub struct Cancelled;

struct Armed {
    id: u64,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Slots {
    next_id: u64,
    delay: Option<Armed>,
    deadline: Option<Armed>,
}

impl Slots {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<Armed> {
        match kind {
            TimerKind::Delay => &mut self.delay,
            TimerKind::Deadline => &mut self.deadline,
        }
    }

    /// Removes and aborts the timer in `kind` if it is still `id`.
    fn disarm(&mut self, kind: TimerKind, id: u64) {
        let slot = self.slot(kind);
        if slot.as_ref().is_some_and(|armed| armed.id == id) {
            if let Some(armed) = slot.take() {
                armed.task.abort();
            }
        }
    }
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct TimerGuard {
    slots: Arc<Mutex<Slots>>,
}

impl std::fmt::Debug for TimerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerGuard")
            .field("pending", &self.pending())
            .finish()
    }
}

impl TimerGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `callback` after `after` unless cancelled first.
    ///
    /// Arming a kind replaces (and cancels) the timer already in that slot.
    /// The callback runs with the guard's lock held and must not call back
    /// into the guard.
    pub fn arm<F>(&self, kind: TimerKind, after: Duration, callback: F) -> ArmedTimer
    where
        F: FnOnce() + Send + 'static,
    {
        let mut slots = lock(&self.slots);
        slots.next_id += 1;
        let id = slots.next_id;

        let weak = Arc::downgrade(&self.slots);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let mut slots = lock(&shared);
            let slot = slots.slot(kind);
            if slot.as_ref().is_some_and(|armed| armed.id == id) {
                *slot = None;
                callback();
            }
        });

        if let Some(previous) = slots.slot(kind).replace(Armed { id, task }) {
            previous.task.abort();
        }

        ArmedTimer {
            slots: Arc::downgrade(&self.slots),
            kind,
            id,
        }
    }

    /// Cancels every pending timer.
    pub fn cancel_all(&self) {
        let mut slots = lock(&self.slots);
        for kind in [TimerKind::Delay, TimerKind::Deadline] {
            if let Some(armed) = slots.slot(kind).take() {
                armed.task.abort();
            }
        }
    }

    /// Number of timers armed and not yet fired.
    pub fn pending(&self) -> usize {
        let slots = lock(&self.slots);
        usize::from(slots.delay.is_some()) + usize::from(slots.deadline.is_some())
    }

    /// Backoff wait. Fails if `cancel` fires or the timer is cancelled.
    pub async fn sleep(&self, after: Duration, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let (tx, rx) = oneshot::channel();
        let _armed = self.arm(TimerKind::Delay, after, move || {
            let _ = tx.send(());
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(Cancelled),
            fired = rx => fired.map_err(|_| Cancelled),
        }
    }

    /// Arms the attempt deadline.
    pub fn deadline(&self, after: Duration) -> Deadline {
        let (tx, rx) = oneshot::channel();
        let armed = self.arm(TimerKind::Deadline, after, move || {
            let _ = tx.send(());
        });
        Deadline {
            rx,
            armed,
            cancelled: false,
        }
    }
}

/// Handle to one armed timer. Dropping it disarms the timer.
#[derive(Debug)]
pub struct ArmedTimer {
    slots: Weak<Mutex<Slots>>,
    kind: TimerKind,
    id: u64,
}

impl ArmedTimer {
    pub fn kind(&self) -> TimerKind {
        self.kind
    }

    pub fn disarm(self) {}
}

impl Drop for ArmedTimer {
    fn drop(&mut self) {
        if let Some(shared) = self.slots.upgrade() {
            lock(&shared).disarm(self.kind, self.id);
        }
    }
}

/// An armed attempt deadline.
#[derive(Debug)]
pub struct Deadline {
    rx: oneshot::Receiver<()>,
    armed: ArmedTimer,
    cancelled: bool,
}

impl Deadline {
    /// Resolves when the deadline passes. Never resolves if the deadline
    /// was cancelled, so a torn-down attempt is not reported as timed out.
    pub async fn expired(&mut self) {
        if !self.cancelled {
            match (&mut self.rx).await {
                Ok(()) => return,
                Err(_) => self.cancelled = true,
            }
        }
        std::future::pending::<()>().await
    }

    pub fn disarm(self) {
        self.armed.disarm();
    }
}
