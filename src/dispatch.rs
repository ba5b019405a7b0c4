//! Method dispatch engine.
//!
//! Turns method calls into request envelopes, registers them in the
//! [`CorrelationTable`], and completes the caller's future when the matching
//! response, a timeout or a connection loss arrives. Responses are matched by
//! correlation key only; arrival order carries no meaning.

use std::io;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, error, trace, warn};

use crate::connection::{BindingConfig, ConnectionState};
use crate::correlation::{CorrelationTable, PendingRequest, Rejected};
use crate::error::CallError;
use crate::header::{ClientId, CorrelationKey, InstanceId, MethodId, ServiceId};
use crate::message::Envelope;
use crate::response::Continuation;
use crate::types::MessageType;

/// A method invocation addressed to one service instance.
#[derive(Debug, Clone)]
pub struct MethodCall {
    pub(crate) service_id: ServiceId,
    pub(crate) instance_id: InstanceId,
    pub(crate) method_id: MethodId,
    pub(crate) client_id: Option<ClientId>,
    pub(crate) payload: Bytes,
    pub(crate) timeout: Option<Duration>,
}

impl MethodCall {
    /// Create a call with an empty payload, the binding's client id and
    /// the default timeout.
    pub fn new(service_id: ServiceId, instance_id: InstanceId, method_id: MethodId) -> Self {
        Self {
            service_id,
            instance_id,
            method_id,
            client_id: None,
            payload: Bytes::new(),
            timeout: None,
        }
    }

    /// Set the client ID.
    pub fn client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = Some(client_id);
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Set the response timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Request/response engine. Lives on the reactor.
#[derive(Debug)]
pub struct MethodDispatcher {
    table: CorrelationTable,
    client_id: ClientId,
    default_timeout: Duration,
    max_payload_size: usize,
}

impl MethodDispatcher {
    /// Create a dispatcher from the binding configuration.
    pub fn new(config: &BindingConfig) -> Self {
        Self {
            table: CorrelationTable::new(),
            client_id: config.client_id,
            default_timeout: config.default_call_timeout,
            max_payload_size: config.payload_limit(),
        }
    }

    /// Start a call: allocate a session, register the continuation and
    /// build the request envelope to send.
    ///
    /// On error the continuation has already been completed with the same
    /// error.
    pub fn begin_call(
        &mut self,
        call: MethodCall,
        continuation: Continuation,
        state: ConnectionState,
        now: Instant,
    ) -> Result<Envelope, CallError> {
        if let Err(err) = self.check_sendable(&call, state) {
            continuation.complete(Err(err.clone()));
            return Err(err);
        }

        let client_id = call.client_id.unwrap_or(self.client_id);
        let session_id = match self.table.allocate_session(client_id) {
            Ok(session_id) => session_id,
            Err(err) => {
                warn!(client = %client_id, %err, "cannot allocate session");
                let err = CallError::from(err);
                continuation.complete(Err(err.clone()));
                return Err(err);
            }
        };

        let key = CorrelationKey::new(client_id, session_id);
        let timeout = call.timeout.unwrap_or(self.default_timeout);
        if let Err(Rejected {
            error: rejected,
            continuation,
        }) = self
            .table
            .register(PendingRequest::new(key, continuation, now, timeout))
        {
            error!(%rejected, "session allocation produced a pending key");
            let err = CallError::from(rejected);
            continuation.complete(Err(err.clone()));
            return Err(err);
        }

        Ok(Envelope::request(call.service_id, call.instance_id, call.method_id)
            .client_id(client_id)
            .session_id(session_id)
            .payload(call.payload)
            .build())
    }

    /// Build a fire-and-forget envelope. Nothing is registered.
    pub fn fire_and_forget(
        &self,
        call: MethodCall,
        state: ConnectionState,
    ) -> Result<Envelope, CallError> {
        self.check_sendable(&call, state)?;
        Ok(
            Envelope::fire_and_forget(call.service_id, call.instance_id, call.method_id)
                .client_id(call.client_id.unwrap_or(self.client_id))
                .payload(call.payload)
                .build(),
        )
    }

    fn check_sendable(&self, call: &MethodCall, state: ConnectionState) -> Result<(), CallError> {
        if !state.is_connected() {
            return Err(CallError::NotConnected);
        }
        if call.payload.len() > self.max_payload_size {
            return Err(CallError::PayloadTooLarge {
                size: call.payload.len(),
                max: self.max_payload_size,
            });
        }
        Ok(())
    }

    /// Writing the request for `key` failed; fail that call only.
    pub fn send_failed(&mut self, key: CorrelationKey, kind: io::ErrorKind) {
        if self.table.cancel(key, CallError::SendFailed(kind)).is_err() {
            debug!(client = %key.client_id, session = %key.session_id, "send failure for settled request");
        }
    }

    /// Handle a Response or ErrorResponse envelope.
    ///
    /// Returns `true` when a pending call was completed. Unmatched responses
    /// are logged and dropped.
    pub fn on_response(&mut self, envelope: Envelope) -> bool {
        let key = envelope.correlation_key();
        let result = match envelope.message_type() {
            MessageType::Response => Ok(envelope.payload),
            MessageType::ErrorResponse => Err(CallError::Application {
                payload: envelope.payload,
            }),
            other => {
                trace!(message_type = ?other, "not a response");
                return false;
            }
        };

        match self.table.resolve(key, result) {
            Ok(()) => true,
            Err(err) => {
                warn!(%err, "dropping unmatched response");
                false
            }
        }
    }

    /// Fail every pending call because the connection went away.
    pub fn on_connection_lost(&mut self) -> usize {
        self.table.cancel_all(CallError::ConnectionLost)
    }

    /// Time out every call whose deadline has passed.
    pub fn expire(&mut self, now: Instant) -> usize {
        let expired = self.table.expire(now);
        if expired > 0 {
            debug!(expired, "timed out pending requests");
        }
        expired
    }

    /// Earliest pending deadline, if any call is in flight.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.table.next_deadline()
    }

    /// Number of calls awaiting a response.
    pub fn pending(&self) -> usize {
        self.table.len()
    }

    /// Read access to the correlation table.
    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }
}
