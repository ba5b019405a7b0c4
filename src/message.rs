//! Daemon message envelopes.

use bytes::Bytes;

use crate::error::{Result, WireError};
use crate::header::{
    ClientId, CorrelationKey, EnvelopeHeader, EventKey, HEADER_SIZE, InstanceId, MemberId,
    MethodId, ServiceId, SessionId,
};
use crate::types::{MessageType, SubscriptionState};

/// Default maximum payload size accepted on the wire (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Largest payload the 32-bit length field can describe.
pub const MAX_WIRE_PAYLOAD_SIZE: usize = u32::MAX as usize;

/// A complete envelope (header + payload).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope header.
    pub header: EnvelopeHeader,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Envelope {
    /// Create a new envelope with the given header and payload.
    pub fn new(mut header: EnvelopeHeader, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        header.payload_length = payload.len() as u32;
        Self { header, payload }
    }

    /// Create a request envelope builder.
    pub fn request(
        service_id: ServiceId,
        instance_id: InstanceId,
        method_id: MethodId,
    ) -> EnvelopeBuilder {
        EnvelopeBuilder::new(MessageType::Request, service_id, instance_id, method_id)
    }

    /// Create a fire-and-forget envelope builder.
    pub fn fire_and_forget(
        service_id: ServiceId,
        instance_id: InstanceId,
        method_id: MethodId,
    ) -> EnvelopeBuilder {
        EnvelopeBuilder::new(MessageType::FireAndForget, service_id, instance_id, method_id)
    }

    /// Create a notification builder for an event.
    pub fn notification(event: EventKey) -> EnvelopeBuilder {
        EnvelopeBuilder::for_event(MessageType::Notification, event)
    }

    /// Create a subscribe control message for an event.
    pub fn subscribe(event: EventKey, client_id: ClientId) -> Self {
        EnvelopeBuilder::for_event(MessageType::Subscribe, event)
            .client_id(client_id)
            .build()
    }

    /// Create an unsubscribe control message for an event.
    pub fn unsubscribe(event: EventKey, client_id: ClientId) -> Self {
        EnvelopeBuilder::for_event(MessageType::Unsubscribe, event)
            .client_id(client_id)
            .build()
    }

    /// Create a subscription acknowledgement for an event.
    pub fn subscribe_ack(event: EventKey, client_id: ClientId) -> Self {
        EnvelopeBuilder::for_event(MessageType::SubscribeAck, event)
            .client_id(client_id)
            .build()
    }

    /// Create a subscription state update for an event.
    pub fn subscription_state_update(
        event: EventKey,
        client_id: ClientId,
        state: SubscriptionState,
    ) -> Self {
        EnvelopeBuilder::for_event(MessageType::SubscriptionStateUpdate, event)
            .client_id(client_id)
            .payload(vec![state as u8])
            .build()
    }

    /// Create a response to this request.
    pub fn create_response(&self) -> EnvelopeBuilder {
        self.reply(MessageType::Response)
    }

    /// Create an error response to this request.
    pub fn create_error_response(&self) -> EnvelopeBuilder {
        self.reply(MessageType::ErrorResponse)
    }

    fn reply(&self, message_type: MessageType) -> EnvelopeBuilder {
        EnvelopeBuilder::new(
            message_type,
            self.header.service_id,
            self.header.instance_id,
            self.header.member_id,
        )
        .client_id(self.header.client_id)
        .session_id(self.header.session_id)
    }

    /// Parse an envelope from bytes.
    ///
    /// Trailing bytes beyond the declared payload are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let header = EnvelopeHeader::from_bytes(data)?;
        let expected_total = HEADER_SIZE + header.payload_length as usize;

        if data.len() < expected_total {
            return Err(WireError::LengthMismatch {
                declared: header.payload_length,
                actual: data.len() - HEADER_SIZE,
            });
        }

        let payload = Bytes::copy_from_slice(&data[HEADER_SIZE..expected_total]);

        Ok(Self { header, payload })
    }

    /// Serialize the envelope to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_size());
        buf.extend_from_slice(&self.header.to_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Get the total envelope size (header + payload).
    pub fn total_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Get the message type.
    pub fn message_type(&self) -> MessageType {
        self.header.message_type
    }

    /// Get the correlation key.
    pub fn correlation_key(&self) -> CorrelationKey {
        self.header.correlation_key()
    }

    /// Get the event key.
    pub fn event_key(&self) -> EventKey {
        self.header.event_key()
    }
}

/// Builder for constructing envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    message_type: MessageType,
    service_id: ServiceId,
    instance_id: InstanceId,
    member_id: MemberId,
    client_id: ClientId,
    session_id: SessionId,
    payload: Bytes,
}

impl EnvelopeBuilder {
    /// Create a new envelope builder.
    pub fn new(
        message_type: MessageType,
        service_id: ServiceId,
        instance_id: InstanceId,
        member_id: impl Into<MemberId>,
    ) -> Self {
        Self {
            message_type,
            service_id,
            instance_id,
            member_id: member_id.into(),
            client_id: ClientId::default(),
            session_id: SessionId::NONE,
            payload: Bytes::new(),
        }
    }

    fn for_event(message_type: MessageType, event: EventKey) -> Self {
        Self::new(message_type, event.service_id, event.instance_id, event.event_id)
    }

    /// Set the client ID.
    pub fn client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set the session ID.
    pub fn session_id(mut self, session_id: SessionId) -> Self {
        self.session_id = session_id;
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Build the envelope.
    pub fn build(self) -> Envelope {
        let header = EnvelopeHeader {
            message_type: self.message_type,
            service_id: self.service_id,
            instance_id: self.instance_id,
            member_id: self.member_id,
            client_id: self.client_id,
            session_id: self.session_id,
            payload_length: self.payload.len() as u32,
        };

        Envelope {
            header,
            payload: self.payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::EventId;

    #[test]
    fn test_envelope_builder() {
        let msg = Envelope::request(ServiceId(1), InstanceId(1), MethodId(5))
            .client_id(ClientId(7))
            .session_id(SessionId(3))
            .payload(vec![0x01, 0x02])
            .build();

        assert_eq!(msg.header.message_type, MessageType::Request);
        assert_eq!(msg.header.member_id, MemberId(5));
        assert_eq!(msg.header.client_id, ClientId(7));
        assert_eq!(msg.header.session_id, SessionId(3));
        assert_eq!(msg.header.payload_length, 2);
        assert_eq!(msg.total_size(), HEADER_SIZE + 2);
    }

    #[test]
    fn test_envelope_wire_layout() {
        let msg = Envelope::request(ServiceId(1), InstanceId(1), MethodId(5))
            .client_id(ClientId(7))
            .session_id(SessionId(1))
            .payload(vec![0x01, 0x02])
            .build();

        assert_eq!(
            msg.to_bytes(),
            vec![
                0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x05, 0x00, 0x07, 0x00, 0x01, 0x00, 0x00,
                0x00, 0x02, 0x01, 0x02
            ]
        );
    }

    #[test]
    fn test_create_response_keeps_correlation() {
        let request = Envelope::request(ServiceId(1), InstanceId(2), MethodId(5))
            .client_id(ClientId(7))
            .session_id(SessionId(0x42))
            .build();

        let response = request.create_response().payload(vec![0xAA]).build();
        assert_eq!(response.message_type(), MessageType::Response);
        assert_eq!(response.correlation_key(), request.correlation_key());
        assert_eq!(response.header.instance_id, InstanceId(2));

        let error = request.create_error_response().build();
        assert_eq!(error.message_type(), MessageType::ErrorResponse);
        assert_eq!(error.correlation_key(), request.correlation_key());
    }

    #[test]
    fn test_control_messages() {
        let event = EventKey::new(ServiceId(1), InstanceId(1), EventId(9));

        let subscribe = Envelope::subscribe(event, ClientId(7));
        assert_eq!(subscribe.message_type(), MessageType::Subscribe);
        assert_eq!(subscribe.event_key(), event);
        assert!(subscribe.payload.is_empty());

        let update =
            Envelope::subscription_state_update(event, ClientId(7), SubscriptionState::Subscribed);
        assert_eq!(update.payload.as_ref(), &[0x02]);
    }

    #[test]
    fn test_parse_truncated_payload() {
        let msg = Envelope::notification(EventKey::new(ServiceId(1), InstanceId(1), EventId(9)))
            .payload(vec![1, 2, 3, 4])
            .build();
        let bytes = msg.to_bytes();

        let result = Envelope::from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            result,
            Err(WireError::LengthMismatch {
                declared: 4,
                actual: 3
            })
        ));
    }
}
