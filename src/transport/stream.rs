//! Stream Framing
//!
//! Envelope boundaries over a byte-stream transport:
//!
//! ```text
//!   [length: u16 big-endian][cipher envelope (length bytes)]
//! ```
//!
//! Datagram transports send the bare envelope and do not use this framing.

use super::TransportError;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest envelope a single frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Prefix an envelope with its big-endian length.
pub fn encode_frame(envelope: &[u8]) -> Result<Vec<u8>, TransportError> {
    if envelope.len() > MAX_FRAME_PAYLOAD {
        return Err(TransportError::FrameTooLarge {
            size: envelope.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + envelope.len());
    frame.extend_from_slice(&(envelope.len() as u16).to_be_bytes());
    frame.extend_from_slice(envelope);
    Ok(frame)
}

/// Read one frame and return its envelope.
///
/// A stream that ends mid-frame, or before a frame starts, yields an
/// `UnexpectedEof` I/O error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    let mut envelope = vec![0u8; len];
    reader.read_exact(&mut envelope).await?;
    Ok(envelope)
}
