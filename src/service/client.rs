//! # Chat Client
//!
//! Connects to a [`BroadcastServer`](crate::service::server::BroadcastServer),
//! runs the initiator side of the key exchange when encryption is enabled, and
//! then sends and receives text messages.
//!
//! Sending and receiving are independent; [`Client::into_split`] hands them to
//! separate tasks so a client can read broadcasts while it writes.

use crate::config::NetworkConfig;
use crate::error::Result;
use crate::protocol::handshake;
use crate::protocol::message::RELAY_OVERHEAD;
use crate::service::channel::{FrameSettings, MessageReader, MessageWriter};
use crate::utils::timeout::with_timeout_error;

use std::net::SocketAddr;
use tokio::net::TcpStream;
use tracing::{debug, info, instrument};

pub struct Client {
    reader: MessageReader,
    writer: MessageWriter,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl Client {
    /// Connect to `config.client.address`
    pub async fn connect(config: &NetworkConfig) -> Result<Self> {
        Self::connect_to(&config.client.address, config).await
    }

    /// Connect to `address`, using `config` for framing, timeouts and encryption.
    ///
    /// # Errors
    /// - `ProtocolError::Timeout` if the connect or the key exchange takes too long
    /// - `ProtocolError::HandshakeError` if the key exchange fails
    #[instrument(skip(config))]
    pub async fn connect_to(address: &str, config: &NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        let client_config = &config.client;
        let transport = &config.transport;

        let stream = with_timeout_error(
            async { Ok(TcpStream::connect(address).await?) },
            client_config.connection_timeout,
        )
        .await?;
        if let Err(err) = stream.set_nodelay(true) {
            debug!(error = %err, "Failed to set TCP_NODELAY");
        }
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        let (mut read_half, mut write_half) = stream.into_split();

        let (encryptor, decryptor) = if transport.encryption_enabled {
            let keys = with_timeout_error(
                handshake::initiate(&mut read_half, &mut write_half, transport),
                client_config.handshake_timeout,
            )
            .await?;
            (Some(keys.encryptor), Some(keys.decryptor))
        } else {
            (None, None)
        };

        info!(peer = %peer_addr, local = %local_addr, encrypted = transport.encryption_enabled, "Connected");
        Ok(Self {
            reader: MessageReader::new(Box::new(read_half), decryptor, FrameSettings::from(transport)),
            writer: MessageWriter::new(
                Box::new(write_half),
                encryptor,
                transport.header_width,
                client_config.send_timeout,
            )
            .with_reserved(RELAY_OVERHEAD),
            peer_addr,
            local_addr,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_encrypted(&self) -> bool {
        self.writer.is_encrypted()
    }

    /// Largest message that survives the relay, if the cipher is bounded.
    ///
    /// This is the cipher's ceiling less [`RELAY_OVERHEAD`], which the server
    /// needs for the `[id] addr: ` prefix it adds before re-encrypting.
    pub fn capacity(&self) -> Option<usize> {
        self.writer.capacity()
    }

    /// # Errors
    /// - `ProtocolError::PayloadTooLarge` before anything is written if the cipher cannot carry `text`
    /// - `ProtocolError::ConnectionClosed` if the server is gone
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.writer.send_text(text).await.map(|_| ())
    }

    /// Wait for the next message from the server
    pub async fn receive(&mut self) -> Result<String> {
        self.reader.recv_text().await
    }

    /// Shut down the sending direction; the server sees a disconnect
    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }

    pub fn into_split(self) -> (ClientSender, ClientReceiver) {
        (
            ClientSender {
                writer: self.writer,
                peer_addr: self.peer_addr,
            },
            ClientReceiver {
                reader: self.reader,
                peer_addr: self.peer_addr,
            },
        )
    }
}

/// Sending half of a split [`Client`]
pub struct ClientSender {
    writer: MessageWriter,
    peer_addr: SocketAddr,
}

impl ClientSender {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn capacity(&self) -> Option<usize> {
        self.writer.capacity()
    }

    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.writer.send_text(text).await.map(|_| ())
    }

    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }
}

/// Receiving half of a split [`Client`]
pub struct ClientReceiver {
    reader: MessageReader,
    peer_addr: SocketAddr,
}

impl ClientReceiver {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn receive(&mut self) -> Result<String> {
        self.reader.recv_text().await
    }
}
