//! Connection lifecycle state machine.
//!
//! ```text
//!  Disconnected --connect()--> Connecting --transport ready--> Connected
//!       ^                          |                               |
//!       +------ transport error / close, or disconnect() ----------+
//! ```
//!
//! The machine only tracks state; the reactor owns the transport and
//! performs the side effects each transition asks for.

use tracing::debug;

use crate::error::ConnectionError;

use super::state::{ConnectionState, ConnectionStats};

/// Callback invoked after every state change.
pub type StateObserver = Box<dyn FnMut(ConnectionState) + Send>;

/// Tracks the state of the daemon connection and notifies observers.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    stats: ConnectionStats,
    observers: Vec<StateObserver>,
}

impl ConnectionStateMachine {
    /// Create a machine in the `Disconnected` state.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            stats: ConnectionStats::default(),
            observers: Vec::new(),
        }
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get connection statistics.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Get mutable connection statistics.
    pub fn stats_mut(&mut self) -> &mut ConnectionStats {
        &mut self.stats
    }

    /// Register an observer for state changes.
    pub fn add_observer(&mut self, observer: StateObserver) {
        self.observers.push(observer);
    }

    /// Application asked to connect.
    ///
    /// Returns `true` when the caller must start a transport connect, and
    /// `false` when a connect is already in flight or established.
    #[must_use]
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Disconnected => {
                self.transition(ConnectionState::Connecting);
                true
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(state = ?self.state, "connect ignored");
                false
            }
        }
    }

    /// The transport finished connecting.
    pub fn on_transport_connected(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                event: "transport connected",
            });
        }
        self.stats.record_connect();
        self.transition(ConnectionState::Connected);
        Ok(())
    }

    /// The transport failed or was closed by the peer.
    ///
    /// Valid from any state. Returns the state that was left.
    pub fn on_transport_lost(&mut self) -> ConnectionState {
        let previous = self.state;
        self.stats.record_failure();
        if previous != ConnectionState::Disconnected {
            self.stats.record_disconnect();
            self.transition(ConnectionState::Disconnected);
        }
        previous
    }

    /// Application asked to disconnect.
    pub fn disconnect(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Disconnected {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                event: "disconnect",
            });
        }
        self.stats.record_disconnect();
        self.transition(ConnectionState::Disconnected);
        Ok(())
    }

    fn transition(&mut self, next: ConnectionState) {
        debug!(from = ?self.state, to = ?next, "connection state change");
        self.state = next;
        for observer in &mut self.observers {
            observer(next);
        }
    }
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .finish()
    }
}
