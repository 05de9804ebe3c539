use crate::config::TransportConfig;
use crate::core::codec::FrameCodec;
use crate::error::{ProtocolError, Result};
use crate::protocol::cipher::{Decryptor, Encryptor};
use crate::transport::send_framed;
use crate::utils::timeout::with_timeout_error;

use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;
use tracing::{debug, instrument};

/// Type-erased read half of a connection
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased write half of a connection
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Frame parameters a reader needs
#[derive(Debug, Clone, Copy)]
pub struct FrameSettings {
    pub header_width: usize,
    pub buffer_size: usize,
    pub max_payload: usize,
}

impl From<&TransportConfig> for FrameSettings {
    fn from(config: &TransportConfig) -> Self {
        Self {
            header_width: config.header_width,
            buffer_size: config.buffer_size,
            max_payload: config.effective_max_payload(),
        }
    }
}

/// Receiving half: frames in, optional decryption, UTF-8 text out.
///
/// Bytes read off the stream stay in the reader's own buffer until a whole
/// frame is decoded, so dropping a pending [`recv_bytes`](Self::recv_bytes)
/// (a timeout, a `select!` branch losing) never loses part of a frame.
pub struct MessageReader {
    reader: BoxReader,
    decryptor: Option<Decryptor>,
    codec: FrameCodec,
    buffer: BytesMut,
    read_buffer: Vec<u8>,
}

impl MessageReader {
    pub fn new(reader: BoxReader, decryptor: Option<Decryptor>, settings: FrameSettings) -> Self {
        Self {
            reader,
            decryptor,
            codec: FrameCodec::new(settings.header_width, settings.max_payload),
            buffer: BytesMut::with_capacity(settings.header_width + settings.buffer_size),
            read_buffer: vec![0u8; settings.buffer_size.max(1)],
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.decryptor.is_some()
    }

    /// Bytes received but not yet part of a complete frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read chunks until the codec yields one complete frame.
    ///
    /// Cancel safe: the only await is a single `read`, and its bytes are moved
    /// into `buffer` before the next await point.
    async fn next_frame(&mut self) -> Result<BytesMut> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buffer)? {
                return Ok(frame);
            }

            let n = self
                .reader
                .read(&mut self.read_buffer)
                .await
                .map_err(ProtocolError::from_io)?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    debug!(pending = self.buffer.len(), "Stream ended inside a frame");
                }
                return Err(ProtocolError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&self.read_buffer[..n]);
        }
    }

    /// Receive one message payload, decrypted if a key was negotiated
    pub async fn recv_bytes(&mut self) -> Result<Vec<u8>> {
        let payload = self.next_frame().await?;

        match &self.decryptor {
            Some(decryptor) => decryptor.decrypt(&payload),
            None => Ok(payload.to_vec()),
        }
    }

    /// Receive one message as text
    ///
    /// # Errors
    /// Returns `ProtocolError::InvalidUtf8` if the plaintext is not UTF-8.
    #[instrument(skip(self), level = "debug")]
    pub async fn recv_text(&mut self) -> Result<String> {
        let bytes = self.recv_bytes().await?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }
}

/// Sending half: text in, optional encryption, frames out.
///
/// A write that times out leaves a partial frame on the stream, so the writer
/// refuses further sends after that.
pub struct MessageWriter {
    writer: BoxWriter,
    encryptor: Option<Encryptor>,
    header_width: usize,
    send_timeout: Duration,
    reserved: usize,
    broken: bool,
}

impl MessageWriter {
    pub fn new(
        writer: BoxWriter,
        encryptor: Option<Encryptor>,
        header_width: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            writer,
            encryptor,
            header_width,
            send_timeout,
            reserved: 0,
            broken: false,
        }
    }

    /// Keep `reserved` bytes of the cipher's ceiling free for text the server
    /// adds when it relays this side's messages.
    pub fn with_reserved(mut self, reserved: usize) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryptor.is_some()
    }

    /// Plaintext ceiling imposed by the negotiated cipher less the reserve, if any
    pub fn capacity(&self) -> Option<usize> {
        self.encryptor
            .as_ref()
            .and_then(Encryptor::capacity)
            .map(|capacity| capacity.saturating_sub(self.reserved))
    }

    /// Turn plaintext into the frame payload without touching the stream
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match &self.encryptor {
            Some(encryptor) => encryptor.encrypt(plaintext),
            None => Ok(plaintext.to_vec()),
        }
    }

    /// Send raw bytes as one message; returns the payload size put on the wire.
    ///
    /// # Errors
    /// - `ProtocolError::PayloadTooLarge` before any write if the cipher cannot carry it
    /// - `ProtocolError::ConnectionClosed` if the peer is gone or an earlier send broke the stream
    /// - `ProtocolError::Timeout` if the write does not finish within the send timeout
    pub async fn send_bytes(&mut self, plaintext: &[u8]) -> Result<usize> {
        if self.broken {
            return Err(ProtocolError::ConnectionClosed);
        }
        if let Some(capacity) = self.capacity() {
            if plaintext.len() > capacity {
                return Err(ProtocolError::PayloadTooLarge {
                    size: plaintext.len(),
                    capacity,
                });
            }
        }

        let payload = self.seal(plaintext)?;
        let header_width = self.header_width;
        let result = with_timeout_error(
            send_framed(&mut self.writer, &payload, header_width),
            self.send_timeout,
        )
        .await;

        match result {
            Ok(()) => Ok(payload.len()),
            // nothing was written for encoding errors, the stream is still clean
            Err(err @ ProtocolError::FrameTooLarge { .. }) => Err(err),
            Err(err) => {
                debug!(error = %err, "Send failed, marking stream broken");
                self.broken = true;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, text), level = "debug", fields(len = text.len()))]
    pub async fn send_text(&mut self, text: &str) -> Result<usize> {
        self.send_bytes(text.as_bytes()).await
    }

    /// Shut down the write direction so the peer sees end of stream
    pub async fn close(&mut self) -> Result<()> {
        self.broken = true;
        self.writer
            .shutdown()
            .await
            .map_err(ProtocolError::from_io)
    }
}
