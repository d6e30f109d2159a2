use std::fmt;

use tracing::{debug, info};

use crate::peer::types::Role;

/// Negotiation phase of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionPhase {
    Idle,
    ChannelReady,
    Negotiating,
    Established,
    Closed,
}

impl fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionPhase::Idle => write!(f, "idle"),
            ConnectionPhase::ChannelReady => write!(f, "channel-ready"),
            ConnectionPhase::Negotiating => write!(f, "negotiating"),
            ConnectionPhase::Established => write!(f, "established"),
            ConnectionPhase::Closed => write!(f, "closed"),
        }
    }
}

/// Single source of truth for where the negotiation stands.
///
/// Replaces the scattered started/ready/initiator flags with one phase and
/// an optional role. Every transition method returns `true` only when it
/// actually moved the phase, so callers can report changes without
/// re-reading state.
#[derive(Debug)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    role: Option<Role>,
    handle_created: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    pub fn new() -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            role: None,
            handle_created: false,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    /// Idle → ChannelReady
    pub fn mark_channel_ready(&mut self) -> bool {
        if self.phase != ConnectionPhase::Idle {
            debug!("mark_channel_ready ignored in phase {}", self.phase);
            return false;
        }
        self.transition(ConnectionPhase::ChannelReady);
        true
    }

    /// ChannelReady → Negotiating, at most once per session.
    ///
    /// Returns whether negotiation was begun; the caller creates the peer
    /// connection only on `true`.
    pub fn try_begin_negotiation(&mut self, role: Role) -> bool {
        if self.phase != ConnectionPhase::ChannelReady || self.handle_created {
            debug!(
                "try_begin_negotiation({:?}) refused: phase={} handle_created={}",
                role, self.phase, self.handle_created
            );
            return false;
        }
        self.role = Some(role);
        self.handle_created = true;
        info!("Negotiation begins as {:?}", role);
        self.transition(ConnectionPhase::Negotiating);
        true
    }

    /// Negotiating → Established
    pub fn mark_established(&mut self) -> bool {
        if self.phase != ConnectionPhase::Negotiating {
            debug!("mark_established ignored in phase {}", self.phase);
            return false;
        }
        self.transition(ConnectionPhase::Established);
        true
    }

    /// Any phase → Closed
    pub fn close(&mut self) -> bool {
        if self.phase == ConnectionPhase::Closed {
            return false;
        }
        self.transition(ConnectionPhase::Closed);
        true
    }

    /// Forgets the role after a remote hangup; only meaningful once closed
    pub fn clear_role(&mut self) {
        if self.phase == ConnectionPhase::Closed {
            self.role = None;
        }
    }

    fn transition(&mut self, next: ConnectionPhase) {
        info!("Connection phase {} -> {}", self.phase, next);
        self.phase = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut state = ConnectionState::new();
        assert_eq!(state.phase(), ConnectionPhase::Idle);
        assert!(state.mark_channel_ready());
        assert!(state.try_begin_negotiation(Role::Initiator));
        assert_eq!(state.role(), Some(Role::Initiator));
        assert!(state.mark_established());
        assert!(state.close());
        assert_eq!(state.phase(), ConnectionPhase::Closed);
    }

    #[test]
    fn channel_ready_is_idempotent() {
        let mut state = ConnectionState::new();
        assert!(state.mark_channel_ready());
        assert!(!state.mark_channel_ready());
        assert_eq!(state.phase(), ConnectionPhase::ChannelReady);
    }

    #[test]
    fn negotiation_begins_at_most_once() {
        let mut state = ConnectionState::new();
        assert!(!state.try_begin_negotiation(Role::Initiator));
        state.mark_channel_ready();
        let begun = (0..5)
            .filter(|_| state.try_begin_negotiation(Role::Responder))
            .count();
        assert_eq!(begun, 1);
        assert_eq!(state.role(), Some(Role::Responder));
    }

    #[test]
    fn role_is_not_replaced_after_start() {
        let mut state = ConnectionState::new();
        state.mark_channel_ready();
        state.try_begin_negotiation(Role::Initiator);
        assert!(!state.try_begin_negotiation(Role::Responder));
        assert_eq!(state.role(), Some(Role::Initiator));
    }

    #[test]
    fn established_requires_negotiation() {
        let mut state = ConnectionState::new();
        state.mark_channel_ready();
        assert!(!state.mark_established());
        assert_eq!(state.phase(), ConnectionPhase::ChannelReady);
    }

    #[test]
    fn closed_is_absorbing() {
        let mut state = ConnectionState::new();
        state.mark_channel_ready();
        assert!(state.close());
        assert!(!state.close());
        assert!(!state.mark_channel_ready());
        assert!(!state.try_begin_negotiation(Role::Initiator));
        assert!(!state.mark_established());
        assert!(state.is_closed());
    }

    #[test]
    fn role_cleared_only_when_closed() {
        let mut state = ConnectionState::new();
        state.mark_channel_ready();
        state.try_begin_negotiation(Role::Responder);
        state.clear_role();
        assert_eq!(state.role(), Some(Role::Responder));
        state.close();
        state.clear_role();
        assert_eq!(state.role(), None);
    }

    #[test]
    fn phases_are_ordered() {
        assert!(ConnectionPhase::Established > ConnectionPhase::Negotiating);
        assert!(ConnectionPhase::ChannelReady < ConnectionPhase::Negotiating);
    }
}
