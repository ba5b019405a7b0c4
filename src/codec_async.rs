//! Async envelope framing for tokio streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::check_payload_length;
use crate::error::Result;
use crate::header::{EnvelopeHeader, HEADER_SIZE};
use crate::message::Envelope;

/// Read one complete envelope from an async stream.
///
/// Reads the header first, then exactly the declared payload. Declared
/// lengths above `max_payload_size` are rejected before any payload is read.
pub async fn read_envelope_async<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_payload_size: usize,
) -> Result<Envelope> {
    let mut header_buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_buf).await?;

    let header = EnvelopeHeader::from_bytes(&header_buf)?;
    let payload_len = check_payload_length(&header, max_payload_size)?;

    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        reader.read_exact(&mut payload).await?;
    }

    Ok(Envelope::new(header, payload))
}

/// Write one envelope to an async stream and flush it.
pub async fn write_envelope_async<W: AsyncWrite + Unpin>(
    writer: &mut W,
    envelope: &Envelope,
) -> Result<()> {
    writer.write_all(&envelope.header.to_bytes()).await?;
    writer.write_all(&envelope.payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Write pre-framed bytes (see [`EnvelopeWriter`](crate::codec::EnvelopeWriter)) and flush.
pub async fn write_frames_async<W: AsyncWrite + Unpin>(writer: &mut W, frames: &[u8]) -> Result<()> {
    writer.write_all(frames).await?;
    writer.flush().await?;
    Ok(())
}
