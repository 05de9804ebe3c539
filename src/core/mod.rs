//! # Core Framing Components
//!
//! The wire format shared by every connection: a fixed-width ASCII decimal length
//! header followed by exactly that many payload bytes.
//!
//! ## Components
//! - **Frame**: header encoding/decoding as plain functions
//! - **Codec**: Tokio codec for buffered framing over byte streams
//!
//! ## Wire Format
//! ```text
//! [Length(header_width), space padded] [Payload(N)]
//! ```
//!
//! ## Security
//! - Readers cap the announced length before reading the payload
//! - Headers carry digits and padding only; anything else is rejected

pub mod codec;
pub mod frame;
