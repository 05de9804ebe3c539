//! # Utility Modules
//!
//! Supporting utilities shared by the protocol and service layers.
//!
//! ## Components
//! - **Crypto**: XChaCha20-Poly1305 AEAD with random nonces
//! - **Logging**: Structured logging setup on `tracing-subscriber`
//! - **Timeout**: Async timeout wrappers and default durations
//! - **Metrics**: Thread-safe observability counters
//!
//! ## Security
//! - Cryptographically secure RNG (getrandom)
//! - Memory zeroing for derived key material (zeroize crate)

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod timeout;
