//! Envelope header and ID newtypes.

use crate::error::{Result, WireError};
use crate::types::MessageType;

/// Size of the envelope header in bytes.
pub const HEADER_SIZE: usize = 15;

/// Service ID - identifies a SOME/IP service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ServiceId(pub u16);

/// Instance ID - identifies one instance of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct InstanceId(pub u16);

/// Method ID - identifies a method within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MethodId(pub u16);

/// Event ID - identifies an event within a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId(pub u16);

/// Method-or-event slot of the envelope header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemberId(pub u16);

/// Client ID - identifies the client making a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClientId(pub u16);

/// Session ID - unique identifier for a request/response pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SessionId(pub u16);

impl InstanceId {
    /// Wildcard instance ID that matches any instance.
    pub const ANY: InstanceId = InstanceId(0xFFFF);

    /// Check if this is the wildcard instance ID.
    pub fn is_any(&self) -> bool {
        self.0 == 0xFFFF
    }
}

impl SessionId {
    /// Session id carried by messages that are not correlated.
    pub const NONE: SessionId = SessionId(0);

    /// First session id handed out to a client.
    pub const FIRST: SessionId = SessionId(1);

    /// Next session id in the 1..=0xFFFF cycle.
    pub fn next(self) -> SessionId {
        match self.0.wrapping_add(1) {
            0 => Self::FIRST,
            id => SessionId(id),
        }
    }
}

impl From<MethodId> for MemberId {
    fn from(id: MethodId) -> Self {
        MemberId(id.0)
    }
}

impl From<EventId> for MemberId {
    fn from(id: EventId) -> Self {
        MemberId(id.0)
    }
}

impl MemberId {
    /// Interpret this member as a method.
    pub fn as_method(self) -> MethodId {
        MethodId(self.0)
    }

    /// Interpret this member as an event.
    pub fn as_event(self) -> EventId {
        EventId(self.0)
    }
}

macro_rules! hex_display {
    ($($ty:ty),+) => {
        $(
            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "0x{:04X}", self.0)
                }
            }
        )+
    };
}

hex_display!(ServiceId, InstanceId, MethodId, EventId, MemberId, ClientId, SessionId);

/// Key matching a response to its request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationKey {
    /// Client that issued the request.
    pub client_id: ClientId,
    /// Session assigned to the request.
    pub session_id: SessionId,
}

impl CorrelationKey {
    /// Create a new correlation key.
    pub fn new(client_id: ClientId, session_id: SessionId) -> Self {
        Self {
            client_id,
            session_id,
        }
    }
}

/// Fully-qualified event address on a multiplexed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Service offering the event.
    pub service_id: ServiceId,
    /// Instance offering the event.
    pub instance_id: InstanceId,
    /// The event itself.
    pub event_id: EventId,
}

impl EventKey {
    /// Create a new event key.
    pub fn new(service_id: ServiceId, instance_id: InstanceId, event_id: EventId) -> Self {
        Self {
            service_id,
            instance_id,
            event_id,
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.service_id, self.instance_id, self.event_id)
    }
}

/// Daemon envelope header (15 bytes, network byte order).
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// |MsgType | Service ID      | Instance ID     | Method/Event ID |Client..
/// +--------+--------+--------+--------+--------+--------+--------+--------+
/// ..ID     | Session ID      |      Payload Length (32 bits)     |
/// +--------+--------+--------+--------+--------+--------+--------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Message type.
    pub message_type: MessageType,
    /// Service ID.
    pub service_id: ServiceId,
    /// Instance ID.
    pub instance_id: InstanceId,
    /// Method or event ID, depending on the message type.
    pub member_id: MemberId,
    /// Client ID.
    pub client_id: ClientId,
    /// Session ID.
    pub session_id: SessionId,
    /// Length of the payload following the header.
    pub payload_length: u32,
}

impl EnvelopeHeader {
    /// Create a header with no correlation and an empty payload.
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
            payload_length: 0,
        }
    }

    /// Parse a header from bytes.
    ///
    /// Only the first [`HEADER_SIZE`] bytes are inspected.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(WireError::MessageTooShort {
                expected: HEADER_SIZE,
                actual: data.len(),
            });
        }

        let message_type =
            MessageType::from_u8(data[0]).ok_or(WireError::UnknownMessageType(data[0]))?;
        let service_id = ServiceId(u16::from_be_bytes([data[1], data[2]]));
        let instance_id = InstanceId(u16::from_be_bytes([data[3], data[4]]));
        let member_id = MemberId(u16::from_be_bytes([data[5], data[6]]));
        let client_id = ClientId(u16::from_be_bytes([data[7], data[8]]));
        let session_id = SessionId(u16::from_be_bytes([data[9], data[10]]));
        let payload_length = u32::from_be_bytes([data[11], data[12], data[13], data[14]]);

        Ok(Self {
            message_type,
            service_id,
            instance_id,
            member_id,
            client_id,
            session_id,
            payload_length,
        })
    }

    /// Serialize the header to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];

        buf[0] = self.message_type as u8;
        buf[1..3].copy_from_slice(&self.service_id.0.to_be_bytes());
        buf[3..5].copy_from_slice(&self.instance_id.0.to_be_bytes());
        buf[5..7].copy_from_slice(&self.member_id.0.to_be_bytes());
        buf[7..9].copy_from_slice(&self.client_id.0.to_be_bytes());
        buf[9..11].copy_from_slice(&self.session_id.0.to_be_bytes());
        buf[11..15].copy_from_slice(&self.payload_length.to_be_bytes());

        buf
    }

    /// Get the correlation key (client_id, session_id).
    pub fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey::new(self.client_id, self.session_id)
    }

    /// Get the event key, interpreting the member slot as an event.
    pub fn event_key(&self) -> EventKey {
        EventKey::new(self.service_id, self.instance_id, self.member_id.as_event())
    }
}
