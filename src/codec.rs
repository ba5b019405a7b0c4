//! Envelope framing over a byte stream.

use bytes::{Buf, BytesMut};

use crate::error::{Result, WireError};
use crate::header::{EnvelopeHeader, HEADER_SIZE};
use crate::message::{DEFAULT_MAX_PAYLOAD_SIZE, Envelope};

/// Check a declared payload length against the configured maximum.
pub fn check_payload_length(header: &EnvelopeHeader, max_payload_size: usize) -> Result<usize> {
    let size = header.payload_length as usize;
    if size > max_payload_size {
        return Err(WireError::PayloadTooLarge {
            size,
            max: max_payload_size,
        });
    }
    Ok(size)
}

/// A buffered reader for envelopes.
///
/// This handles partial reads and accumulates data until a complete
/// envelope is available.
#[derive(Debug)]
pub struct EnvelopeReader {
    buffer: BytesMut,
    max_payload_size: usize,
}

impl EnvelopeReader {
    /// Create a new envelope reader.
    pub fn new() -> Self {
        Self::with_capacity(4096)
    }

    /// Create a new envelope reader with a specific buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Set the largest payload length accepted from the stream.
    pub fn with_max_payload_size(mut self, max: usize) -> Self {
        self.max_payload_size = max;
        self
    }

    /// Add data to the internal buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to parse a complete envelope from the buffer.
    ///
    /// Returns `Some(envelope)` if a complete envelope is available,
    /// `None` if more data is needed. Errors mean the stream is corrupt;
    /// the buffered bytes are left untouched.
    pub fn try_parse(&mut self) -> Result<Option<Envelope>> {
        // Need at least header
        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let header = EnvelopeHeader::from_bytes(&self.buffer[..HEADER_SIZE])?;
        let payload_len = check_payload_length(&header, self.max_payload_size)?;

        if self.buffer.len() < HEADER_SIZE + payload_len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let payload = self.buffer.split_to(payload_len).freeze();

        Ok(Some(Envelope { header, payload }))
    }

    /// Parse all complete envelopes from the buffer.
    pub fn parse_all(&mut self) -> Result<Vec<Envelope>> {
        let mut envelopes = Vec::new();
        while let Some(envelope) = self.try_parse()? {
            envelopes.push(envelope);
        }
        Ok(envelopes)
    }

    /// Clear the buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get the number of bytes in the buffer.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

impl Default for EnvelopeReader {
    fn default() -> Self {
        Self::new()
    }
}

/// A writer that frames several envelopes into one contiguous buffer.
#[derive(Debug)]
pub struct EnvelopeWriter {
    buffer: Vec<u8>,
    count: usize,
}

impl EnvelopeWriter {
    /// Create a new envelope writer.
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            count: 0,
        }
    }

    /// Encode an envelope into the internal buffer.
    pub fn encode(&mut self, envelope: &Envelope) {
        self.buffer.extend_from_slice(&envelope.header.to_bytes());
        self.buffer.extend_from_slice(&envelope.payload);
        self.count += 1;
    }

    /// Get the encoded data.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of envelopes encoded since the last take or clear.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Take the encoded data, clearing the internal buffer.
    pub fn take(&mut self) -> Vec<u8> {
        self.count = 0;
        std::mem::take(&mut self.buffer)
    }

    /// Clear the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.count = 0;
    }

    /// Check if nothing has been encoded.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl Default for EnvelopeWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{ClientId, EventId, EventKey, InstanceId, MethodId, ServiceId, SessionId};

    fn request() -> Envelope {
        Envelope::request(ServiceId(1), InstanceId(1), MethodId(5))
            .client_id(ClientId(7))
            .session_id(SessionId(1))
            .payload(b"hello".as_slice())
            .build()
    }

    #[test]
    fn test_reader_complete() {
        let msg = request();

        let mut reader = EnvelopeReader::new();
        reader.feed(&msg.to_bytes());

        let parsed = reader.try_parse().unwrap();
        assert_eq!(parsed, Some(msg));
        assert!(reader.is_empty());
    }

    #[test]
    fn test_reader_partial() {
        let msg = request();
        let data = msg.to_bytes();

        let mut reader = EnvelopeReader::new();

        // Header split in the middle
        reader.feed(&data[..7]);
        assert!(reader.try_parse().unwrap().is_none());

        // Header complete, payload not
        reader.feed(&data[7..17]);
        assert!(reader.try_parse().unwrap().is_none());

        reader.feed(&data[17..]);
        assert_eq!(reader.try_parse().unwrap(), Some(msg));
    }

    #[test]
    fn test_reader_multiple() {
        let msg1 = request();
        let msg2 = Envelope::notification(EventKey::new(ServiceId(1), InstanceId(1), EventId(9)))
            .payload(b"sample".as_slice())
            .build();

        let mut data = msg1.to_bytes();
        data.extend_from_slice(&msg2.to_bytes());

        let mut reader = EnvelopeReader::new();
        reader.feed(&data);

        let envelopes = reader.parse_all().unwrap();
        assert_eq!(envelopes, vec![msg1, msg2]);
    }

    #[test]
    fn test_reader_rejects_unknown_type() {
        let mut data = request().to_bytes();
        data[0] = 0x55;

        let mut reader = EnvelopeReader::new();
        reader.feed(&data);
        assert!(matches!(
            reader.try_parse(),
            Err(WireError::UnknownMessageType(0x55))
        ));
    }

    #[test]
    fn test_reader_rejects_oversized_length() {
        let msg = request();

        let mut reader = EnvelopeReader::new().with_max_payload_size(4);
        // Only the header is needed to reject the declared length.
        reader.feed(&msg.to_bytes()[..HEADER_SIZE]);
        assert!(matches!(
            reader.try_parse(),
            Err(WireError::PayloadTooLarge { size: 5, max: 4 })
        ));
    }

    #[test]
    fn test_writer_batches() {
        let msg = request();

        let mut writer = EnvelopeWriter::new();
        writer.encode(&msg);
        writer.encode(&msg);
        assert_eq!(writer.count(), 2);

        let data = writer.take();
        assert_eq!(data.len(), msg.total_size() * 2);
        assert!(writer.is_empty());
    }
}
