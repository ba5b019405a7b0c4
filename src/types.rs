//! Core envelope types and constants.

/// Envelope message types exchanged with the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Method request expecting a response.
    Request = 0x00,
    /// Method request not expecting a response.
    FireAndForget = 0x01,
    /// Event sample for a subscribed event.
    Notification = 0x02,
    /// Subscribe to an event.
    Subscribe = 0x10,
    /// Unsubscribe from an event.
    Unsubscribe = 0x11,
    /// Daemon acknowledged a subscription.
    SubscribeAck = 0x12,
    /// Daemon-driven change of a subscription state.
    SubscriptionStateUpdate = 0x13,
    /// Successful response to a request.
    Response = 0x80,
    /// Application error response to a request.
    ErrorResponse = 0x81,
}

impl MessageType {
    /// Create a MessageType from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Request),
            0x01 => Some(Self::FireAndForget),
            0x02 => Some(Self::Notification),
            0x10 => Some(Self::Subscribe),
            0x11 => Some(Self::Unsubscribe),
            0x12 => Some(Self::SubscribeAck),
            0x13 => Some(Self::SubscriptionStateUpdate),
            0x80 => Some(Self::Response),
            0x81 => Some(Self::ErrorResponse),
            _ => None,
        }
    }

    /// Check if this message type expects a response.
    pub fn expects_response(&self) -> bool {
        matches!(self, Self::Request)
    }

    /// Check if this is a response message type.
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response | Self::ErrorResponse)
    }

    /// Check if this type is only ever sent by the application side.
    ///
    /// The daemon never legitimately sends these to a client.
    pub fn is_client_originated(&self) -> bool {
        matches!(
            self,
            Self::Request | Self::FireAndForget | Self::Subscribe | Self::Unsubscribe
        )
    }

    /// Check if this is a subscription control message.
    pub fn is_subscription_control(&self) -> bool {
        matches!(
            self,
            Self::Subscribe
                | Self::Unsubscribe
                | Self::SubscribeAck
                | Self::SubscriptionStateUpdate
        )
    }
}

/// Subscription state of a single event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum SubscriptionState {
    /// No subscription is active.
    #[default]
    NotSubscribed = 0x00,
    /// Subscribe requested, waiting for the daemon to acknowledge.
    SubscriptionPending = 0x01,
    /// Subscription acknowledged; samples are delivered.
    Subscribed = 0x02,
}

impl SubscriptionState {
    /// Create a SubscriptionState from a raw byte value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::NotSubscribed),
            0x01 => Some(Self::SubscriptionPending),
            0x02 => Some(Self::Subscribed),
            _ => None,
        }
    }

    /// Check if `next` follows `self` in the subscription cycle.
    ///
    /// The only legal moves are NotSubscribed -> SubscriptionPending ->
    /// Subscribed -> NotSubscribed, plus falling back to NotSubscribed from a
    /// pending subscription that the daemon rejected.
    pub fn can_transition_to(&self, next: SubscriptionState) -> bool {
        matches!(
            (self, next),
            (Self::NotSubscribed, Self::SubscriptionPending)
                | (Self::SubscriptionPending, Self::Subscribed)
                | (Self::SubscriptionPending, Self::NotSubscribed)
                | (Self::Subscribed, Self::NotSubscribed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_from_u8() {
        assert_eq!(MessageType::from_u8(0x00), Some(MessageType::Request));
        assert_eq!(MessageType::from_u8(0x12), Some(MessageType::SubscribeAck));
        assert_eq!(MessageType::from_u8(0x81), Some(MessageType::ErrorResponse));
        assert_eq!(MessageType::from_u8(0x03), None);
        assert_eq!(MessageType::from_u8(0xFF), None);
    }

    #[test]
    fn test_message_type_direction() {
        assert!(MessageType::Request.expects_response());
        assert!(!MessageType::FireAndForget.expects_response());
        assert!(MessageType::Subscribe.is_client_originated());
        assert!(!MessageType::Notification.is_client_originated());
        assert!(MessageType::ErrorResponse.is_response());
        assert!(MessageType::SubscriptionStateUpdate.is_subscription_control());
    }

    #[test]
    fn test_subscription_cycle() {
        use SubscriptionState::*;

        assert!(NotSubscribed.can_transition_to(SubscriptionPending));
        assert!(SubscriptionPending.can_transition_to(Subscribed));
        assert!(Subscribed.can_transition_to(NotSubscribed));
        assert!(!NotSubscribed.can_transition_to(Subscribed));
        assert!(!Subscribed.can_transition_to(SubscriptionPending));
        assert!(!Subscribed.can_transition_to(Subscribed));
    }

    #[test]
    fn test_subscription_state_from_u8() {
        assert_eq!(SubscriptionState::from_u8(2), Some(SubscriptionState::Subscribed));
        assert_eq!(SubscriptionState::from_u8(3), None);
    }
}
