//! # Error Types
//!
//! Error handling for framing, transport, key exchange and the broadcast server.
//!
//! ## Error Categories
//! - **Framing**: malformed or oversized headers (`FrameError`, `FrameTooLarge`, `OversizedPacket`)
//! - **Transport**: peer closes, graceful or abrupt, are normalized to `ConnectionClosed`
//! - **Handshake**: malformed key material during the exchange
//! - **Cryptographic**: capacity violations and encrypt/decrypt failures
//! - **Registry**: unknown connection ids, connection limit, poisoned lock
//!
//! All errors implement `std::error::Error` for interoperability.
//!
//! ## Example Usage
//! ```rust
//! use chatwire::core::frame;
//! use chatwire::error::{ProtocolError, Result};
//!
//! fn header_of(payload: &[u8]) -> Result<usize> {
//!     let frame = frame::encode(payload, 4)?;
//!     frame::decode_header(&frame[..4])
//! }
//!
//! assert_eq!(header_of(b"hello").unwrap(), 5);
//! assert!(matches!(
//!     header_of(&[0u8; 10_000]),
//!     Err(ProtocolError::FrameTooLarge { .. })
//! ));
//! ```

use crate::service::registry::ConnectionId;
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Framing errors
    pub const ERR_EMPTY_HEADER: &str = "Frame header is empty";
    pub const ERR_NON_ASCII_HEADER: &str = "Frame header is not ASCII";
    pub const ERR_NON_DIGIT_HEADER: &str = "Frame header contains non-digit characters";
    pub const ERR_HEADER_OVERFLOW: &str = "Frame header value does not fit in usize";

    /// Handshake errors
    pub const ERR_PEER_CLOSED_DURING_HANDSHAKE: &str = "Peer closed during key exchange";
    pub const ERR_MALFORMED_RSA_KEY: &str = "Malformed RSA public key";
    pub const ERR_MALFORMED_X25519_KEY: &str = "X25519 public key must be 32 bytes";
    pub const ERR_NON_CONTRIBUTORY_KEY: &str = "Peer sent a low-order X25519 public key";
    pub const ERR_KEY_GENERATION: &str = "Key pair generation failed";
    pub const ERR_KEY_EXPORT: &str = "Public key export failed";
}

/// ProtocolError is the primary error type for all operations in this crate
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Frame error: {0}")]
    FrameError(String),

    #[error("Frame too large: length {length} does not fit in a {header_width}-byte header")]
    FrameTooLarge { length: usize, header_width: usize },

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Payload too large: {size} bytes exceeds cipher capacity of {capacity} bytes")]
    PayloadTooLarge { size: usize, capacity: usize },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Encryption failed")]
    EncryptionFailure,

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Connection {0} not found")]
    NotFound(ConnectionId),

    #[error("Connection limit reached: {0}")]
    ConnectionLimit(usize),

    #[error("Synchronization primitive poisoned")]
    LockPoisoned,

    #[error("Timeout occurred")]
    Timeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ProtocolError {
    /// Whether this error means the peer is gone and the connection should be torn down
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed)
    }

    /// Map an I/O error, folding every flavour of peer disconnect into `ConnectionClosed`
    pub(crate) fn from_io(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::WriteZero => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(err),
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
