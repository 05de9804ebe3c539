//! # Service Layer
//!
//! The chat relay built on top of framing and the key exchange.
//!
//! ## Components
//! - **Channel**: per-connection reader and writer halves (framing + cipher)
//! - **Registry**: id-keyed table of live connections
//! - **Server**: accept loop, per-connection workers, broadcast
//! - **Client**: connect, send, receive

pub mod channel;
pub mod client;
pub mod registry;
pub mod server;
