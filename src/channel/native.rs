//! Browser native messaging framing: every message is a 32-bit length in native byte order
//! followed by that many bytes of UTF-8 JSON.

use std::io::ErrorKind;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest message the browser sends to a host.
pub const MAX_INBOUND_FRAME: usize = 64 * 1024 * 1024;
/// Largest message the browser accepts from a host.
pub const MAX_OUTBOUND_FRAME: usize = 1024 * 1024;

/// Reads one frame. `None` means the browser closed the pipe.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut length = [0u8; 4];
    match reader.read_exact(&mut length).await {
        Ok(_) => (),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => Err(e).context("Failed to read frame length")?,
    }

    let length = u32::from_ne_bytes(length) as usize;
    if length > MAX_INBOUND_FRAME {
        bail!("Frame of {length} bytes exceeds the limit");
    }

    let mut body = vec![0u8; length];
    reader
        .read_exact(&mut body)
        .await
        .context("Stream ended inside a frame")?;
    Ok(Some(body))
}

pub async fn write_message<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<()> {
    let body = serde_json::to_vec(message)?;
    if body.len() > MAX_OUTBOUND_FRAME {
        bail!("Message of {} bytes is too large to send", body.len());
    }

    writer.write_all(&(body.len() as u32).to_ne_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use anyhow::Result;
    use serde_json::{json, Value};

    use super::*;

    #[tokio::test]
    async fn test_frames_through_a_pipe() -> Result<()> {
        let (mut host, mut browser) = tokio::io::duplex(1024);

        write_message(&mut host, &json!({"type": "syncComplete"})).await?;
        write_message(&mut host, &json!({"type": "response", "success": true})).await?;
        drop(host);

        let first = read_frame(&mut browser).await?.unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&first)?,
            json!({"type": "syncComplete"})
        );
        assert!(read_frame(&mut browser).await?.is_some());
        assert!(read_frame(&mut browser).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_length_prefix_is_native_endian() -> Result<()> {
        let mut out = Vec::new();
        write_message(&mut out, &json!(1)).await?;
        assert_eq!(out, [1u32.to_ne_bytes().as_slice(), b"1"].concat());
        Ok(())
    }

    #[tokio::test]
    async fn test_truncated_and_oversized_frames() {
        let mut truncated = Cursor::new([10u32.to_ne_bytes().as_slice(), b"{}"].concat());
        assert!(read_frame(&mut truncated).await.is_err());

        let mut oversized = Cursor::new(u32::MAX.to_ne_bytes().to_vec());
        assert!(read_frame(&mut oversized).await.is_err());

        let too_long = "x".repeat(MAX_OUTBOUND_FRAME);
        assert!(write_message(&mut Vec::new(), &too_long).await.is_err());
    }
}
