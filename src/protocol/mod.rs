//! # Protocol Layer
//!
//! Everything above raw framing: the key exchange, the cipher suites it sets up,
//! and the chat message formats the server relays.
//!
//! ## Components
//! - **Handshake**: one round trip of public keys, responder first
//! - **Cipher**: RSA (direct, capacity bounded) and X25519 + XChaCha20-Poly1305
//! - **Message**: sender-annotated chat lines and server notices

pub mod cipher;
pub mod handshake;
pub mod message;
