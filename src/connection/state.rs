//! Connection state and statistics.

use std::time::Instant;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected. Initial state, and the state after any transport failure.
    #[default]
    Disconnected,
    /// Transport connect in flight.
    Connecting,
    /// Connected and ready to send.
    Connected,
}

impl ConnectionState {
    /// Check if the connection is usable.
    pub fn is_connected(&self) -> bool {
        *self == ConnectionState::Connected
    }

    /// Check if a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        *self == ConnectionState::Connecting
    }

    /// Check if the connection is down.
    pub fn is_disconnected(&self) -> bool {
        *self == ConnectionState::Disconnected
    }
}

/// Connection statistics.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    /// Number of successful connections.
    pub connect_count: u64,
    /// Number of failed connection attempts and transport errors.
    pub failure_count: u64,
    /// Number of envelopes sent.
    pub messages_sent: u64,
    /// Number of envelopes received.
    pub messages_received: u64,
    /// Total bytes sent.
    pub bytes_sent: u64,
    /// Total bytes received.
    pub bytes_received: u64,
    /// Calls that ran into their timeout.
    pub timeouts: u64,
    /// Responses that matched no pending call.
    pub unmatched_responses: u64,
    /// Malformed input that tore the connection down.
    pub protocol_errors: u64,
    /// Time of last successful connection.
    pub last_connected: Option<Instant>,
    /// Time of last disconnect.
    pub last_disconnected: Option<Instant>,
    /// Time of last error.
    pub last_error: Option<Instant>,
}

impl ConnectionStats {
    /// Record a successful connection.
    pub fn record_connect(&mut self) {
        self.connect_count += 1;
        self.last_connected = Some(Instant::now());
    }

    /// Record a disconnection.
    pub fn record_disconnect(&mut self) {
        self.last_disconnected = Some(Instant::now());
    }

    /// Record a connection failure.
    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_error = Some(Instant::now());
    }

    /// Record sent envelopes.
    pub fn record_send(&mut self, messages: usize, bytes: usize) {
        self.messages_sent += messages as u64;
        self.bytes_sent += bytes as u64;
    }

    /// Record a received envelope.
    pub fn record_receive(&mut self, bytes: usize) {
        self.messages_received += 1;
        self.bytes_received += bytes as u64;
    }

    /// Record calls that timed out.
    pub fn record_timeouts(&mut self, count: usize) {
        self.timeouts += count as u64;
    }

    /// Record a response nobody was waiting for.
    pub fn record_unmatched(&mut self) {
        self.unmatched_responses += 1;
    }

    /// Record a protocol error.
    pub fn record_protocol_error(&mut self) {
        self.protocol_errors += 1;
    }

    /// Get time since the last connect.
    pub fn uptime(&self) -> Option<std::time::Duration> {
        self.last_connected.map(|t| t.elapsed())
    }
}
