use crate::core::frame::{self, DEFAULT_HEADER_WIDTH};
use crate::error::{ProtocolError, Result};
use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Tokio codec for the fixed-width decimal header format.
///
/// Decoding is incremental: the header is parsed once enough bytes are buffered,
/// the declared length is checked against `max_payload` before anything else is
/// reserved, and the payload is split off the buffer without copying.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    header_width: usize,
    max_payload: usize,
}

impl FrameCodec {
    pub fn new(header_width: usize, max_payload: usize) -> Self {
        Self {
            header_width,
            max_payload,
        }
    }

    pub fn header_width(&self) -> usize {
        self.header_width
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_WIDTH, crate::config::MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < self.header_width {
            return Ok(None);
        }

        let length = frame::decode_header(&src[..self.header_width])?;
        if length > self.max_payload {
            return Err(ProtocolError::OversizedPacket(length));
        }

        let total = self.header_width + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let _header = src.split_to(self.header_width);
        Ok(Some(src.split_to(length)))
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let payload = item.as_ref();
        if payload.len() > self.max_payload {
            return Err(ProtocolError::OversizedPacket(payload.len()));
        }

        let mut header = Vec::with_capacity(self.header_width);
        frame::write_header(payload.len(), self.header_width, &mut header)?;

        dst.reserve(header.len() + payload.len());
        dst.put_slice(&header);
        dst.put_slice(payload);
        Ok(())
    }
}
