//! Connection state machine.
//!
//! Pure bookkeeping: the manager feeds it [`Trigger`]s and acts on the
//! [`Transition`]s it returns. Triggers that make no sense in the current
//! state are ignored and yield `None`.

use crate::types::ConnectionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Owner asked to connect.
    Connect,
    /// An owned attempt is about to open the transport.
    AttemptStarted,
    AttemptSucceeded,
    AttemptFailed,
    /// Transport reported a connect outside an owned attempt.
    TransportConnect,
    TransportDisconnect { manual: bool },
    TransportReconnect,
    /// Transport's own reconnection gave up.
    ReconnectFailed,
    /// Owner asked to disconnect.
    Disconnect,
    /// Owner asked for a fresh attempt sequence.
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

#[derive(Debug, Clone)]
pub struct Machine {
    state: ConnectionState,
    has_connected_once: bool,
    attempts: u32,
    max_attempts: u32,
}

impl Machine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            has_connected_once: false,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn has_connected_once(&self) -> bool {
        self.has_connected_once
    }

    /// Failed attempts in the current sequence.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn apply(&mut self, trigger: Trigger) -> Option<Transition> {
        use crate::types::ConnectionState::*;

        let from = self.state;
        let to = match (trigger, from) {
            (Trigger::Connect, Disconnected | Failed) => {
                self.attempts = 0;
                Connecting
            }

            (Trigger::AttemptStarted, Connecting | Retrying) => Connecting,

            (Trigger::AttemptSucceeded, Connecting) => {
                self.has_connected_once = true;
                self.attempts = 0;
                Connected
            }

            (Trigger::AttemptFailed, Connecting | Retrying) => {
                self.attempts = self.attempts.saturating_add(1);
                if self.attempts >= self.max_attempts {
                    Failed
                } else {
                    Retrying
                }
            }

            (Trigger::TransportConnect | Trigger::TransportReconnect, Disconnected | Connected)
                if self.has_connected_once =>
            {
                Connected
            }

            (Trigger::TransportDisconnect { .. }, Connected) => Disconnected,

            (Trigger::ReconnectFailed, Disconnected | Connected) => Failed,

            (Trigger::Disconnect, _) => Disconnected,

            (Trigger::Reconnect, Disconnected | Failed) => {
                self.has_connected_once = false;
                Disconnected
            }

            _ => return None,
        };

        self.state = to;
        Some(Transition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConnectionState::*;

    fn connected(max: u32) -> Machine {
        let mut m = Machine::new(max);
        m.apply(Trigger::Connect);
        m.apply(Trigger::AttemptStarted);
        m.apply(Trigger::AttemptSucceeded);
        assert_eq!(m.state(), Connected);
        m
    }

    #[test]
    fn starts_disconnected() {
        let m = Machine::new(10);
        assert_eq!(m.state(), Disconnected);
        assert!(!m.has_connected_once());
        assert_eq!(m.attempts(), 0);
        assert_eq!(m.max_attempts(), 10);
    }

    #[test]
    fn first_attempt_success() {
        let mut m = Machine::new(10);
        assert_eq!(
            m.apply(Trigger::Connect),
            Some(Transition {
                from: Disconnected,
                to: Connecting
            })
        );
        let t = m.apply(Trigger::AttemptStarted).unwrap();
        assert!(!t.changed());
        assert_eq!(
            m.apply(Trigger::AttemptSucceeded),
            Some(Transition {
                from: Connecting,
                to: Connected
            })
        );
        assert!(m.has_connected_once());
    }

    #[test]
    fn connect_ignored_while_in_progress_or_connected() {
        let mut m = Machine::new(10);
        m.apply(Trigger::Connect);
        assert_eq!(m.apply(Trigger::Connect), None);

        m.apply(Trigger::AttemptFailed);
        assert_eq!(m.state(), Retrying);
        assert_eq!(m.apply(Trigger::Connect), None);

        let mut m = connected(10);
        assert_eq!(m.apply(Trigger::Connect), None);
    }

    #[test]
    fn failures_retry_until_budget() {
        let mut m = Machine::new(3);
        m.apply(Trigger::Connect);

        m.apply(Trigger::AttemptStarted);
        assert_eq!(m.apply(Trigger::AttemptFailed).unwrap().to, Retrying);
        assert_eq!(m.attempts(), 1);

        assert_eq!(
            m.apply(Trigger::AttemptStarted),
            Some(Transition {
                from: Retrying,
                to: Connecting
            })
        );
        assert_eq!(m.apply(Trigger::AttemptFailed).unwrap().to, Retrying);

        m.apply(Trigger::AttemptStarted);
        assert_eq!(m.apply(Trigger::AttemptFailed).unwrap().to, Failed);
        assert_eq!(m.attempts(), 3);
        assert_eq!(m.apply(Trigger::AttemptStarted), None);
    }

    #[test]
    fn connect_from_failed_resets_counter() {
        let mut m = Machine::new(1);
        m.apply(Trigger::Connect);
        m.apply(Trigger::AttemptFailed);
        assert_eq!(m.state(), Failed);

        assert_eq!(m.apply(Trigger::Connect).unwrap().to, Connecting);
        assert_eq!(m.attempts(), 0);
    }

    #[test]
    fn single_attempt_budget_fails_immediately() {
        let mut m = Machine::new(1);
        m.apply(Trigger::Connect);
        assert_eq!(m.apply(Trigger::AttemptFailed).unwrap().to, Failed);
    }

    #[test]
    fn transport_events_after_first_success() {
        let mut m = connected(10);

        let t = m
            .apply(Trigger::TransportDisconnect { manual: false })
            .unwrap();
        assert_eq!(t.to, Disconnected);
        assert!(m.has_connected_once());

        assert_eq!(m.apply(Trigger::TransportReconnect).unwrap().to, Connected);

        // A bare connect while already connected is accepted but unchanged.
        let t = m.apply(Trigger::TransportConnect).unwrap();
        assert!(!t.changed());
    }

    #[test]
    fn transport_reconnect_ignored_before_first_success() {
        let mut m = Machine::new(10);
        assert_eq!(m.apply(Trigger::TransportReconnect), None);
        assert_eq!(m.apply(Trigger::TransportConnect), None);
        assert_eq!(m.state(), Disconnected);
    }

    #[test]
    fn transport_disconnect_only_from_connected() {
        let mut m = Machine::new(10);
        m.apply(Trigger::Connect);
        assert_eq!(
            m.apply(Trigger::TransportDisconnect { manual: true }),
            None
        );
        assert_eq!(m.state(), Connecting);
    }

    #[test]
    fn native_reconnect_failure() {
        let mut m = connected(10);
        m.apply(Trigger::TransportDisconnect { manual: false });
        assert_eq!(m.apply(Trigger::ReconnectFailed).unwrap().to, Failed);
        assert!(m.has_connected_once());
    }

    #[test]
    fn disconnect_from_anywhere() {
        for setup in [
            Vec::new(),
            vec![Trigger::Connect],
            vec![Trigger::Connect, Trigger::AttemptFailed],
            vec![Trigger::Connect, Trigger::AttemptSucceeded],
        ] {
            let mut m = Machine::new(10);
            for t in setup {
                m.apply(t);
            }
            assert_eq!(m.apply(Trigger::Disconnect).unwrap().to, Disconnected);
        }
    }

    #[test]
    fn reconnect_clears_history() {
        let mut m = connected(10);
        assert_eq!(m.apply(Trigger::Reconnect), None);
        assert!(m.has_connected_once());

        m.apply(Trigger::TransportDisconnect { manual: false });
        assert_eq!(m.apply(Trigger::Reconnect).unwrap().to, Disconnected);
        assert!(!m.has_connected_once());
    }

    #[test]
    fn reconnect_ignored_while_in_progress() {
        let mut m = Machine::new(10);
        m.apply(Trigger::Connect);
        assert_eq!(m.apply(Trigger::Reconnect), None);
        m.apply(Trigger::AttemptFailed);
        assert_eq!(m.apply(Trigger::Reconnect), None);
    }
}
