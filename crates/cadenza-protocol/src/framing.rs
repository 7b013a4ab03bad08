//! Length-prefixed framing over a byte stream.
//!
//! Every message in either direction is a `u32` little-endian payload
//! length followed by that many bytes. The payload is one encoded command.
//! A length above [`MAX_PAYLOAD_LEN`] can only come from a confused or
//! hostile peer, so it fails the frame instead of allocating.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{from_bytes, to_bytes, Decode, Encode};
use crate::ProtocolError;

/// Largest accepted frame payload (1 MiB).
pub const MAX_PAYLOAD_LEN: u32 = 1024 * 1024;

/// Reads one frame payload.
///
/// Returns `Ok(None)` when the stream ends cleanly on a frame boundary.
/// EOF in the middle of a frame is an error like any other short read.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    // Probe one byte so EOF on a frame boundary reads as a clean close,
    // while EOF inside the prefix stays an error.
    let n = reader.read(&mut len_buf[..1]).await?;
    if n == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Writes one frame: length prefix, then payload.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge {
        len: u32::MAX,
        max: MAX_PAYLOAD_LEN,
    })?;
    if len > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads and decodes one framed value. `Ok(None)` on clean EOF.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, ProtocolError>
where
    R: AsyncRead + Unpin,
    T: Decode,
{
    match read_frame(reader).await? {
        Some(payload) => Ok(Some(from_bytes(&payload)?)),
        None => Ok(None),
    }
}

/// Encodes and writes one framed value.
pub async fn write_message<W, T>(writer: &mut W, value: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Encode,
{
    write_frame(writer, &to_bytes(value)).await
}

// =========================================================================
// Tests
// =========================================================================
