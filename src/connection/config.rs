//! Binding configuration types.

use std::time::Duration;

use crate::header::ClientId;
use crate::message::{DEFAULT_MAX_PAYLOAD_SIZE, MAX_WIRE_PAYLOAD_SIZE};

/// Configuration of one binding instance (one daemon channel).
#[derive(Debug, Clone)]
pub struct BindingConfig {
    /// Client ID used for control messages and calls that do not name one.
    pub client_id: ClientId,
    /// Timeout applied to calls that do not carry their own.
    pub default_call_timeout: Duration,
    /// Upper bound on a single transport connect attempt.
    pub connect_timeout: Duration,
    /// Largest payload accepted in either direction. Values above
    /// [`MAX_WIRE_PAYLOAD_SIZE`] are treated as that limit.
    pub max_payload_size: usize,
    /// Size of the per-read scratch buffer.
    pub read_buffer_size: usize,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            client_id: ClientId(0x0001),
            default_call_timeout: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            read_buffer_size: 4096,
        }
    }
}

impl BindingConfig {
    /// Create a configuration for the given client.
    pub fn for_client(client_id: ClientId) -> Self {
        Self {
            client_id,
            ..Default::default()
        }
    }

    /// Set the client ID.
    pub fn with_client_id(mut self, client_id: ClientId) -> Self {
        self.client_id = client_id;
        self
    }

    /// Set the default call timeout.
    pub fn with_default_call_timeout(mut self, timeout: Duration) -> Self {
        self.default_call_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the maximum payload size, capped at what the length field holds.
    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max.min(MAX_WIRE_PAYLOAD_SIZE);
        self
    }

    /// Payload limit actually enforced on the wire.
    pub fn payload_limit(&self) -> usize {
        self.max_payload_size.min(MAX_WIRE_PAYLOAD_SIZE)
    }

    /// Set the read buffer size. Zero is raised to one byte.
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BindingConfig::default();
        assert_eq!(config.client_id, ClientId(0x0001));
        assert_eq!(config.default_call_timeout, Duration::from_secs(1));
        assert_eq!(config.max_payload_size, DEFAULT_MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_builder() {
        let config = BindingConfig::for_client(ClientId(7))
            .with_default_call_timeout(Duration::from_millis(100))
            .with_connect_timeout(Duration::from_secs(10))
            .with_read_buffer_size(0);

        assert_eq!(config.client_id, ClientId(7));
        assert_eq!(config.default_call_timeout, Duration::from_millis(100));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.read_buffer_size, 1);
    }

    #[test]
    fn test_payload_limit_fits_length_field() {
        let config = BindingConfig::default().with_max_payload_size(usize::MAX);
        assert_eq!(config.max_payload_size, MAX_WIRE_PAYLOAD_SIZE);
        assert_eq!(config.payload_limit(), u32::MAX as usize);

        let config = BindingConfig {
            max_payload_size: usize::MAX,
            ..Default::default()
        };
        assert_eq!(config.payload_limit(), MAX_WIRE_PAYLOAD_SIZE);
        assert_eq!(BindingConfig::default().payload_limit(), DEFAULT_MAX_PAYLOAD_SIZE);
    }
}
