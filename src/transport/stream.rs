use crate::core::frame;
use crate::error::{ProtocolError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// Write every byte of `bytes`, looping over short writes, then flush.
///
/// # Errors
/// Returns `ProtocolError::ConnectionClosed` if the peer goes away mid-write.
pub async fn send_all<W>(writer: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut written = 0;
    while written < bytes.len() {
        let n = writer
            .write(&bytes[written..])
            .await
            .map_err(ProtocolError::from_io)?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        written += n;
    }
    writer.flush().await.map_err(ProtocolError::from_io)?;
    trace!(bytes = written, "Sent");
    Ok(())
}

/// Read exactly `n` bytes, looping over partial reads.
///
/// A zero-length read means the peer closed; it is reported immediately as
/// `ProtocolError::ConnectionClosed` and never retried.
pub async fn recv_exact<R>(reader: &mut R, n: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; n];
    let mut filled = 0;
    while filled < n {
        let read = reader
            .read(&mut buf[filled..])
            .await
            .map_err(ProtocolError::from_io)?;
        if read == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }
        filled += read;
    }
    Ok(buf)
}

/// Encode `payload` as a frame and send it.
///
/// Encoding errors are returned before anything touches the stream.
pub async fn send_framed<W>(writer: &mut W, payload: &[u8], header_width: usize) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = frame::encode(payload, header_width)?;
    send_all(writer, &frame).await
}

/// Receive one frame and return its payload.
///
/// The payload is read as `length / buffer_size` full chunks followed by the
/// remainder, so a single read never asks for more than `buffer_size` bytes.
///
/// # Errors
/// - `ProtocolError::ConnectionClosed` if the peer closes at any point
/// - `ProtocolError::FrameError` for a malformed header
/// - `ProtocolError::OversizedPacket` if the header announces more than `max_payload`
pub async fn recv_framed<R>(
    reader: &mut R,
    header_width: usize,
    buffer_size: usize,
    max_payload: usize,
) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let header = recv_exact(reader, header_width).await?;
    let length = frame::decode_header(&header)?;
    if length > max_payload {
        return Err(ProtocolError::OversizedPacket(length));
    }
    if length == 0 {
        return Ok(Vec::new());
    }

    let buffer_size = buffer_size.max(1);
    let chunks = length / buffer_size;
    let remainder = length - chunks * buffer_size;

    let mut payload = Vec::with_capacity(length);
    for _ in 0..chunks {
        payload.extend_from_slice(&recv_exact(reader, buffer_size).await?);
    }
    if remainder > 0 {
        payload.extend_from_slice(&recv_exact(reader, remainder).await?);
    }

    trace!(length, chunks, remainder, "Received frame");
    Ok(payload)
}
