//! # Frame Format
//!
//! A frame is a fixed-width header followed by the payload:
//!
//! ```text
//! [Length(header_width), ASCII decimal, space padded on the left] [Payload(length)]
//! ```
//!
//! With the default width of 50 a five byte payload produces a 55 byte frame whose
//! header is 49 spaces followed by `5`. The header carries no marker characters, so
//! trimming whitespace and parsing the digits is the whole decoding step.

use crate::error::{constants, ProtocolError, Result};

/// Default header width in bytes
pub const DEFAULT_HEADER_WIDTH: usize = 50;

/// Number of decimal digits needed to write `value`
#[inline]
pub(crate) fn decimal_digits(value: usize) -> usize {
    let mut digits = 1;
    let mut rest = value / 10;
    while rest > 0 {
        digits += 1;
        rest /= 10;
    }
    digits
}

/// Largest payload length a header of `header_width` bytes can describe
pub fn max_length_for_width(header_width: usize) -> usize {
    if header_width >= decimal_digits(usize::MAX) {
        return usize::MAX;
    }
    10usize.pow(header_width as u32) - 1
}

/// Write the header for a payload of `length` bytes into `out`
pub(crate) fn write_header(length: usize, header_width: usize, out: &mut Vec<u8>) -> Result<()> {
    let digits = length.to_string();
    if digits.len() > header_width {
        return Err(ProtocolError::FrameTooLarge {
            length,
            header_width,
        });
    }
    out.resize(out.len() + header_width - digits.len(), b' ');
    out.extend_from_slice(digits.as_bytes());
    Ok(())
}

/// Encode `payload` into a frame with a `header_width`-byte header.
///
/// # Errors
/// Returns `ProtocolError::FrameTooLarge` if the payload length has more decimal
/// digits than the header can hold.
pub fn encode(payload: &[u8], header_width: usize) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(header_width + payload.len());
    write_header(payload.len(), header_width, &mut frame)?;
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Parse a frame header into the payload length it announces.
///
/// Leading and trailing whitespace is ignored.
///
/// # Errors
/// Returns `ProtocolError::FrameError` if the header is empty after trimming or
/// contains anything other than ASCII digits.
pub fn decode_header(header: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(header)
        .ok()
        .filter(|s| s.is_ascii())
        .ok_or_else(|| ProtocolError::FrameError(constants::ERR_NON_ASCII_HEADER.into()))?;

    let digits = text.trim();
    if digits.is_empty() {
        return Err(ProtocolError::FrameError(constants::ERR_EMPTY_HEADER.into()));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::FrameError(format!(
            "{}: {digits:?}",
            constants::ERR_NON_DIGIT_HEADER
        )));
    }

    digits
        .parse::<usize>()
        .map_err(|_| ProtocolError::FrameError(constants::ERR_HEADER_OVERFLOW.into()))
}
