//! # Stream Transport
//!
//! Reliable send/receive of exact byte counts over any Tokio stream.
//!
//! A single `read` or `write` on a socket may move fewer bytes than requested.
//! The functions here loop until the full amount has moved, and turn a
//! zero-length read (or a reset/broken pipe) into `ProtocolError::ConnectionClosed`
//! so callers see one uniform disconnect signal.
//!
//! ## Responsibilities
//! - `send_all` / `recv_exact`: short-write and partial-read loops
//! - `send_framed` / `recv_framed`: framing on top, with chunked payload reads
//!   bounded by the configured buffer size

pub mod stream;

pub use stream::{recv_exact, recv_framed, send_all, send_framed};
