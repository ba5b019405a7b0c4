//! Error types for the binding core.
//!
//! Each component reports its own error kind; nothing here is a crate-wide
//! catch-all.

use std::io;

use bytes::Bytes;
use thiserror::Error;

use crate::connection::ConnectionState;
use crate::header::{ClientId, CorrelationKey, EventKey, SessionId};

/// Errors raised while decoding or encoding envelopes.
///
/// Any decode error on a live connection is a protocol error and tears the
/// connection down.
#[derive(Error, Debug)]
pub enum WireError {
    /// I/O error while reading or writing a framed envelope.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Buffer too short to contain an envelope header.
    #[error("Message too short: expected at least {expected} bytes, got {actual}")]
    MessageTooShort { expected: usize, actual: usize },

    /// Unknown message type value.
    #[error("Unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Declared payload exceeds the configured maximum.
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Declared payload length does not match the bytes provided.
    #[error("Payload length mismatch: header says {declared} bytes, got {actual}")]
    LengthMismatch { declared: u32, actual: usize },
}

impl WireError {
    /// The I/O error kind behind this error, `InvalidData` for protocol errors.
    pub fn io_kind(&self) -> io::ErrorKind {
        match self {
            Self::Io(err) => err.kind(),
            _ => io::ErrorKind::InvalidData,
        }
    }
}

/// Errors raised by the connection state machine and the binding handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Event is not valid in the current state.
    #[error("Invalid connection transition: {event} while {from:?}")]
    InvalidTransition {
        from: ConnectionState,
        event: &'static str,
    },

    /// Operation requires a connected transport.
    #[error("Not connected")]
    NotConnected,

    /// The reactor task is no longer running.
    #[error("Reactor stopped")]
    ReactorStopped,
}

/// Errors raised by the request correlation table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// A request with this key is already in flight.
    #[error("Request already pending (client={}, session={})", .0.client_id, .0.session_id)]
    AlreadyPending(CorrelationKey),

    /// No request is pending for this key.
    #[error("No pending request (client={}, session={})", .0.client_id, .0.session_id)]
    Unmatched(CorrelationKey),

    /// Every session id of the client is in flight.
    #[error("Session ids exhausted for client {0}")]
    SessionIdsExhausted(ClientId),
}

/// Outcome error of a method call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// The connection was not established when the call was made.
    #[error("Not connected")]
    NotConnected,

    /// The connection dropped while the call was pending.
    #[error("Connection lost")]
    ConnectionLost,

    /// No response arrived within the call timeout.
    #[error("No response received for request (client={client_id}, session={session_id})")]
    Timeout {
        client_id: ClientId,
        session_id: SessionId,
    },

    /// Every session id of the client is in flight.
    #[error("Session ids exhausted for client {0}")]
    SessionIdsExhausted(ClientId),

    /// The allocated correlation key was already pending.
    #[error("Duplicate request (client={}, session={})", .0.client_id, .0.session_id)]
    DuplicateRequest(CorrelationKey),

    /// The service answered with an error response.
    #[error("Application error ({} byte payload)", .payload.len())]
    Application { payload: Bytes },

    /// Request payload exceeds the configured maximum.
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Writing the request to the transport failed.
    #[error("Send failed: {0}")]
    SendFailed(io::ErrorKind),

    /// The reactor task is no longer running.
    #[error("Reactor stopped")]
    ReactorStopped,
}

impl CallError {
    /// Check if this error was caused by the connection rather than the service.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::ConnectionLost | Self::SendFailed(_) | Self::ReactorStopped
        )
    }

    /// Check if retrying the call later could succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::ConnectionLost
                | Self::Timeout { .. }
                | Self::SessionIdsExhausted(_)
                | Self::SendFailed(_)
        )
    }
}

impl From<CorrelationError> for CallError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::AlreadyPending(key) => Self::DuplicateRequest(key),
            CorrelationError::SessionIdsExhausted(client_id) => {
                Self::SessionIdsExhausted(client_id)
            }
            // A fresh call is never unmatched; surface it as a lost request.
            CorrelationError::Unmatched(_) => Self::ConnectionLost,
        }
    }
}

/// Errors raised by the event subscription manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The event already has a pending or active subscription.
    #[error("Event {0} is already subscribed")]
    AlreadySubscribed(EventKey),

    /// The event has no subscription entry.
    #[error("Event {0} has no subscription")]
    UnknownEvent(EventKey),

    /// The reactor task is no longer running.
    #[error("Reactor stopped")]
    ReactorStopped,
}

/// Errors raised by the binding context lifecycle.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// `initialize` was called twice.
    #[error("Binding already initialized")]
    AlreadyInitialized,

    /// `deinitialize` was called before `initialize`.
    #[error("Binding not initialized")]
    NotInitialized,
}

/// Result type alias for envelope codec operations.
pub type Result<T> = std::result::Result<T, WireError>;
