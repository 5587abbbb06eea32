use thiserror::Error;

use crate::address::PeerAddress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("illegal connection transition {from:?} -> {to:?}")]
pub struct StateTransitionError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

/// Result of the radio reporting the link as up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkUp {
    Established(PeerAddress),
    /// A teardown was requested while connecting; the link must be dropped.
    Cancelled(PeerAddress),
}

/// Result of the radio reporting the link as down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkDown {
    AttemptFailed(PeerAddress),
    AttemptCancelled(PeerAddress),
    Lost(PeerAddress),
    Closed(PeerAddress),
    /// Already disconnected; nothing changed.
    Ignored,
}

/// Peripheral connection lifecycle. Only radio-confirmed events move the
/// state; local requests merely record intent.
#[derive(Debug, Default)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    peer: Option<PeerAddress>,
    ready: bool,
    teardown_requested: bool,
}

impl ConnectionStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_connecting(&self) -> bool {
        self.state == ConnectionState::Connecting
    }

    /// Connected, services discovered and notifications enabled.
    pub fn is_ready(&self) -> bool {
        self.is_connected() && self.ready
    }

    /// Peer currently being attempted or connected.
    pub fn peer(&self) -> Option<PeerAddress> {
        self.peer
    }

    pub fn teardown_requested(&self) -> bool {
        self.teardown_requested
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), StateTransitionError> {
        use ConnectionState::*;
        let allowed = matches!(
            (self.state, to),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Disconnected)
                | (Connecting, Disconnected)
        );
        if !allowed {
            return Err(StateTransitionError {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }

    /// The radio accepted a connect request for `peer`.
    pub fn begin_attempt(&mut self, peer: PeerAddress) -> Result<(), StateTransitionError> {
        self.transition(ConnectionState::Connecting)?;
        self.peer = Some(peer);
        self.ready = false;
        self.teardown_requested = false;
        Ok(())
    }

    pub fn on_link_up(&mut self) -> Result<LinkUp, StateTransitionError> {
        let Some(peer) = self.peer.filter(|_| self.is_connecting()) else {
            return Err(StateTransitionError {
                from: self.state,
                to: ConnectionState::Connected,
            });
        };
        if self.teardown_requested {
            self.transition(ConnectionState::Disconnected)?;
            self.reset();
            return Ok(LinkUp::Cancelled(peer));
        }
        self.transition(ConnectionState::Connected)?;
        Ok(LinkUp::Established(peer))
    }

    pub fn on_link_down(&mut self) -> LinkDown {
        let Some(peer) = self.peer else {
            return LinkDown::Ignored;
        };
        let outcome = match (self.state, self.teardown_requested) {
            (ConnectionState::Disconnected, _) => return LinkDown::Ignored,
            (ConnectionState::Connecting, false) => LinkDown::AttemptFailed(peer),
            (ConnectionState::Connecting, true) => LinkDown::AttemptCancelled(peer),
            (ConnectionState::Connected, false) => LinkDown::Lost(peer),
            (ConnectionState::Connected, true) => LinkDown::Closed(peer),
        };
        self.state = ConnectionState::Disconnected;
        self.reset();
        outcome
    }

    /// Notifications are enabled on the connected link.
    pub fn mark_ready(&mut self) -> bool {
        if self.is_connected() {
            self.ready = true;
        }
        self.ready
    }

    /// Records a local teardown request. Returns false if already disconnected.
    pub fn request_teardown(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        self.teardown_requested = true;
        self.ready = false;
        true
    }

    fn reset(&mut self) {
        self.peer = None;
        self.ready = false;
        self.teardown_requested = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> PeerAddress {
        PeerAddress::from_octets([0xAB; 6])
    }

    #[test]
    fn starts_disconnected() {
        let sm = ConnectionStateMachine::new();
        assert_eq!(sm.state(), ConnectionState::Disconnected);
        assert!(!sm.is_connected());
        assert!(!sm.is_connecting());
        assert!(!sm.is_ready());
    }

    #[test]
    fn full_lifecycle() {
        let mut sm = ConnectionStateMachine::new();
        sm.begin_attempt(peer()).expect("attempt from disconnected");
        assert!(sm.is_connecting());
        assert_eq!(sm.on_link_up(), Ok(LinkUp::Established(peer())));
        assert!(sm.is_connected());
        assert!(!sm.is_ready());
        assert!(sm.mark_ready());
        assert!(sm.is_ready());
        assert_eq!(sm.on_link_down(), LinkDown::Lost(peer()));
        assert_eq!(sm.state(), ConnectionState::Disconnected);
        assert_eq!(sm.peer(), None);
    }

    #[test]
    fn never_jumps_from_disconnected_to_connected() {
        let mut sm = ConnectionStateMachine::new();
        let err = sm.on_link_up().expect_err("no attempt in flight");
        assert_eq!(err.from, ConnectionState::Disconnected);
        assert_eq!(err.to, ConnectionState::Connected);
        assert!(!sm.is_connected());
    }

    #[test]
    fn second_attempt_while_connecting_is_rejected() {
        let mut sm = ConnectionStateMachine::new();
        sm.begin_attempt(peer()).expect("first attempt");
        assert!(sm.begin_attempt(peer()).is_err());
        assert!(!sm.mark_ready());
    }

    #[test]
    fn failed_attempt_returns_to_disconnected() {
        let mut sm = ConnectionStateMachine::new();
        sm.begin_attempt(peer()).expect("attempt");
        assert_eq!(sm.on_link_down(), LinkDown::AttemptFailed(peer()));
        assert_eq!(sm.on_link_down(), LinkDown::Ignored);
    }

    #[test]
    fn teardown_while_connecting_wins_over_late_link_up() {
        let mut sm = ConnectionStateMachine::new();
        sm.begin_attempt(peer()).expect("attempt");
        assert!(sm.request_teardown());
        assert!(sm.is_connecting());
        assert_eq!(sm.on_link_up(), Ok(LinkUp::Cancelled(peer())));
        assert_eq!(sm.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn teardown_when_connected_reports_closed() {
        let mut sm = ConnectionStateMachine::new();
        assert!(!sm.request_teardown());
        sm.begin_attempt(peer()).expect("attempt");
        sm.on_link_up().expect("link up");
        assert!(sm.request_teardown());
        assert!(sm.is_connected());
        assert_eq!(sm.on_link_down(), LinkDown::Closed(peer()));
    }
}
