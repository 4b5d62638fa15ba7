//! Length-prefixed framing over async byte streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::errors::WireError;
use crate::message::Message;
use crate::WireResult;

/// Frame header size: big-endian body length.
pub const HEADER_SIZE: usize = 4;

/// Hard cap on one message body (ciphertext tensors are large).
pub const MAX_BODY_SIZE: usize = 1 << 30;

/// Write one framed message.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> WireResult<()> {
    let body = bincode::serialize(message).map_err(|e| WireError::Codec(e.to_string()))?;
    if body.len() > MAX_BODY_SIZE {
        return Err(WireError::MessageTooLarge(body.len()));
    }
    trace!(kind = message.kind(), bytes = body.len(), "writing message");
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed message. `Err(ConnectionClosed)` on a clean EOF at a
/// frame boundary as well as mid-frame; the session treats both as a peer
/// disconnect.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> WireResult<Message> {
    let mut header = [0u8; HEADER_SIZE];
    read_exact_or_closed(reader, &mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_BODY_SIZE {
        return Err(WireError::MessageTooLarge(len));
    }
    let mut body = vec![0u8; len];
    read_exact_or_closed(reader, &mut body).await?;
    let message = bincode::deserialize(&body).map_err(|e| WireError::Codec(e.to_string()))?;
    trace!(kind = Message::kind(&message), bytes = len, "read message");
    Ok(message)
}

async fn read_exact_or_closed<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
) -> WireResult<()> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(WireError::ConnectionClosed)
        }
        Err(e) => Err(WireError::Io(e)),
    }
}
