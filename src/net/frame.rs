//! Length-prefixed framing over async streams.
//!
//! Every frame is a u32 big-endian payload length followed by the payload.
//! Length-prefixing removes message splitting/coalescing ambiguity on the
//! byte stream. The reader enforces a maximum frame size so a hostile or
//! corrupt length prefix cannot force an unbounded allocation.

use crate::core::error::{CacheError, CacheResult};
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> CacheResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| CacheError::FrameTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before a
/// frame header. EOF in the middle of a frame is an error.
pub async fn read_frame<R>(reader: &mut R, max_frame: usize) -> CacheResult<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame {
        return Err(CacheError::FrameTooLarge {
            size: len,
            max: max_frame,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Bytes::from(payload)))
}
