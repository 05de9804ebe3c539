//! # chatwire
//!
//! Length-prefixed framing, a per-connection public key exchange, and a
//! broadcast chat server over raw TCP.
//!
//! ## Layers
//! - [`core`]: the wire format, a fixed-width ASCII decimal length header
//!   followed by the payload
//! - [`transport`]: exact-count send/receive and framed I/O over any Tokio stream
//! - [`protocol`]: the key exchange, cipher suites, and chat message formats
//! - [`service`]: connection registry, broadcast server, and client
//! - [`config`], [`error`], [`utils`]: configuration, errors, logging, metrics
//!
//! ## Example
//! ```no_run
//! use chatwire::{BroadcastServer, Client, NetworkConfig};
//!
//! # async fn demo() -> chatwire::Result<()> {
//! let config = NetworkConfig::default_with_overrides(|c| {
//!     c.server.address = "127.0.0.1:5000".into();
//! });
//! let server = BroadcastServer::bind(&config).await?;
//! let running = server.clone();
//! tokio::spawn(async move { running.run().await });
//!
//! let mut alice = Client::connect(&config).await?;
//! let mut bob = Client::connect(&config).await?;
//! alice.send("hi").await?;
//! println!("{}", bob.receive().await?);
//!
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::{ClientConfig, LoggingConfig, NetworkConfig, ServerConfig, TransportConfig};
pub use error::{ProtocolError, Result};
pub use protocol::cipher::CipherSuite;
pub use protocol::message::{ChatMessage, Notice};
pub use service::client::{Client, ClientReceiver, ClientSender};
pub use service::registry::ConnectionId;
pub use service::server::{BroadcastReport, BroadcastServer, ConnectionState};
