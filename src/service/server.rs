//! # Broadcast Server
//!
//! Accepts TCP clients, optionally runs the key exchange with each, and relays
//! every message a client sends to all other registered clients.
//!
//! ## Lifecycle
//! Each accepted socket goes through
//! `Connecting → Handshaking (encryption only) → Active → Closed`. Setup
//! failures abort only that socket. Once `Active`, a dedicated worker task
//! reads messages and broadcasts them annotated with the sender. When the peer
//! goes away the worker deregisters it first and then tells everyone else.
//!
//! ## Shutdown
//! A single [`CancellationToken`] is observed by the accept loop and every
//! worker. [`BroadcastServer::run`] waits up to `shutdown_timeout` for workers
//! to return, aborts the stragglers, and closes whatever is still registered.

use crate::config::{NetworkConfig, ServerConfig, TransportConfig};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake;
use crate::protocol::message::{ChatMessage, Notice};
use crate::service::channel::{FrameSettings, MessageReader, MessageWriter};
use crate::service::registry::{Connection, ConnectionId, ConnectionRegistry};
use crate::utils::metrics::{Metrics, Timer};
use crate::utils::timeout::with_timeout_error;

use futures::future::join_all;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Where a connection is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    Active,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Handshaking => "handshaking",
            ConnectionState::Active => "active",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Outcome of one broadcast, in registration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<ConnectionId>,
    pub failed: Vec<ConnectionId>,
    /// Subset of `failed` whose cipher could not carry the text
    pub oversized: Vec<ConnectionId>,
}

impl BroadcastReport {
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }
}

/// Bind a listening socket with address reuse and an explicit backlog.
///
/// Every address `address` resolves to is tried in turn; the first that binds
/// wins.
pub async fn listen(address: &str, backlog: u32) -> Result<TcpListener> {
    let mut last_err = None;
    for addr in lookup_host(address).await? {
        match bind_socket(addr, backlog) {
            Ok(listener) => return Ok(listener),
            Err(err) => {
                debug!(address = %addr, error = %err, "Bind attempt failed");
                last_err = Some(err);
            }
        }
    }

    Err(match last_err {
        Some(err) => ProtocolError::Io(err),
        None => ProtocolError::ConfigError(format!("Address resolved to nothing: {address}")),
    })
}

fn bind_socket(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}

/// Chat relay over a shared connection registry.
///
/// Cloning is cheap and every clone drives the same listener, registry and
/// shutdown token, so a clone can be moved into a task running [`run`](Self::run)
/// while the original keeps calling [`broadcast`](Self::broadcast) or
/// [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct BroadcastServer {
    listener: Arc<TcpListener>,
    registry: Arc<ConnectionRegistry>,
    metrics: Arc<Metrics>,
    config: Arc<NetworkConfig>,
    shutdown: CancellationToken,
}

impl BroadcastServer {
    /// Validate `config` and bind to `config.server.address`.
    #[instrument(skip(config), fields(address = %config.server.address))]
    pub async fn bind(config: &NetworkConfig) -> Result<Self> {
        config.validate_strict()?;
        let listener = listen(&config.server.address, config.server.backlog).await?;
        info!(address = %listener.local_addr()?, encryption = config.transport.encryption_enabled, "Server listening");
        Ok(Self::from_listener(listener, config.clone()))
    }

    /// Wrap an already bound listener
    pub fn from_listener(listener: TcpListener, config: NetworkConfig) -> Self {
        Self {
            listener: Arc::new(listener),
            registry: Arc::new(ConnectionRegistry::new(config.server.max_connections)),
            metrics: Arc::new(Metrics::new()),
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    fn server_config(&self) -> &ServerConfig {
        &self.config.server
    }

    fn transport_config(&self) -> &TransportConfig {
        &self.config.transport
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn connection_ids(&self) -> Result<Vec<ConnectionId>> {
        self.registry.ids()
    }

    pub fn connection_count(&self) -> Result<usize> {
        self.registry.len()
    }

    /// # Errors
    /// Returns `ProtocolError::NotFound` if `id` is not registered.
    pub fn peer_address(&self, id: ConnectionId) -> Result<SocketAddr> {
        Ok(self.registry.get(id)?.peer_addr())
    }

    /// Accept one socket, run the key exchange if enabled, and register it.
    ///
    /// No worker is started for the connection; the caller drives it through
    /// [`receive_from`](Self::receive_from) and [`send_to`](Self::send_to).
    #[instrument(skip(self))]
    pub async fn accept(&self) -> Result<ConnectionId> {
        let (stream, addr) = self.listener.accept().await?;
        self.establish(stream, addr).await
    }

    async fn establish(&self, stream: TcpStream, addr: SocketAddr) -> Result<ConnectionId> {
        debug!(peer = %addr, state = %ConnectionState::Connecting, "Accepted socket");
        if let Err(err) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %err, "Failed to set TCP_NODELAY");
        }

        let max = self.registry.max_connections();
        if self.registry.len()? >= max {
            self.metrics.connection_rejected();
            warn!(peer = %addr, max, "Connection limit reached, rejecting");
            return Err(ProtocolError::ConnectionLimit(max));
        }

        let transport = self.transport_config();
        let (mut read_half, mut write_half) = stream.into_split();

        let (encryptor, decryptor) = if transport.encryption_enabled {
            debug!(peer = %addr, state = %ConnectionState::Handshaking, "Starting key exchange");
            self.metrics.handshake_attempt();
            let _timer = Timer::start("server_handshake");
            match with_timeout_error(
                handshake::respond(&mut read_half, &mut write_half, transport),
                self.server_config().handshake_timeout,
            )
            .await
            {
                Ok(keys) => (Some(keys.encryptor), Some(keys.decryptor)),
                Err(err) => {
                    self.metrics.handshake_failed();
                    return Err(err);
                }
            }
        } else {
            (None, None)
        };

        let reader = MessageReader::new(Box::new(read_half), decryptor, FrameSettings::from(transport));
        let writer = MessageWriter::new(
            Box::new(write_half),
            encryptor,
            transport.header_width,
            self.server_config().send_timeout,
        );

        let id = match self.registry.add(addr, reader, writer) {
            Ok(id) => id,
            Err(err) => {
                if matches!(err, ProtocolError::ConnectionLimit(_)) {
                    self.metrics.connection_rejected();
                }
                return Err(err);
            }
        };
        self.metrics.connection_registered();
        info!(
            id = %id,
            peer = %addr,
            encrypted = transport.encryption_enabled,
            state = %ConnectionState::Active,
            "Client connected"
        );
        Ok(id)
    }

    /// Accept clients until the shutdown token is cancelled.
    ///
    /// Every accepted socket is handled in its own task, so a slow handshake
    /// never holds up the accept loop.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<()> {
        let mut workers = JoinSet::new();
        info!(address = %self.local_addr()?, "Accepting connections");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let server = self.clone();
                        workers.spawn(async move { server.handle(stream, addr).await });
                    }
                    Err(err) => {
                        error!(error = %err, "Error accepting connection");
                    }
                },

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    if let Err(err) = joined {
                        error!(error = %err, "Connection task failed");
                    }
                }
            }
        }

        info!(workers = workers.len(), "Shutting down server, waiting for workers");
        let drained = tokio::time::timeout(self.server_config().shutdown_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = workers.len(), "Shutdown timeout reached, aborting workers");
            workers.shutdown().await;
        }

        self.close_all().await?;
        self.metrics.log_metrics();
        Ok(())
    }

    /// Request shutdown and close every registered connection.
    ///
    /// A running [`run`](Self::run) loop stops accepting and returns once its
    /// workers are done.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutdown requested");
        self.shutdown.cancel();
        self.close_all().await
    }

    async fn close_all(&self) -> Result<()> {
        for conn in self.registry.clear()? {
            self.metrics.connection_removed();
            if let Err(err) = conn.close().await {
                debug!(id = %conn.id(), error = %err, "Close during shutdown failed");
            }
        }
        Ok(())
    }

    async fn handle(&self, stream: TcpStream, addr: SocketAddr) {
        let established = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            established = self.establish(stream, addr) => established,
        };

        match established {
            Ok(id) => self.serve(id).await,
            Err(err) => {
                warn!(peer = %addr, error = %err, "Connection setup failed");
            }
        }
    }

    /// Worker loop for one registered connection
    #[instrument(skip(self))]
    async fn serve(&self, id: ConnectionId) {
        let conn = match self.registry.get(id) {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let addr = conn.peer_addr();

        let reason = loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Worker stopping for shutdown");
                    return;
                }
                received = self.recv(&conn) => received,
            };

            match received {
                Ok(text) => {
                    let message = ChatMessage::new(id, addr, text);
                    match self.broadcast(&message.to_string(), Some(id)).await {
                        Ok(report) if !report.oversized.is_empty() => {
                            self.report_undelivered(&conn, report.oversized.len()).await;
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "Broadcast failed"),
                    }
                }
                Err(err) => break err,
            }
        };

        if reason.is_connection_closed() {
            info!(peer = %addr, "Client disconnected");
        } else {
            self.metrics.connection_error();
            warn!(peer = %addr, error = %reason, "Dropping connection");
        }
        self.close_connection(&conn).await;
    }

    /// Tell a sender its line was dropped for some recipients
    async fn report_undelivered(&self, conn: &Connection, recipients: usize) {
        warn!(recipients, "Relayed line exceeds recipient cipher capacity");
        let notice = Notice::Undelivered { recipients };
        match conn.send_text(&notice.to_string()).await {
            Ok(sent) => self.metrics.message_sent(sent as u64),
            Err(err) => {
                self.metrics.delivery_failed();
                debug!(error = %err, "Failed to report undelivered line");
            }
        }
    }

    async fn recv(&self, conn: &Connection) -> Result<String> {
        let text = with_timeout_error(conn.recv_text(), self.server_config().idle_timeout).await?;
        self.metrics.message_received(text.len() as u64);
        Ok(text)
    }

    /// Deregister first, then announce, so the departed peer is never a recipient
    async fn close_connection(&self, conn: &Connection) {
        debug!(id = %conn.id(), state = %ConnectionState::Closed, "Closing connection");
        match self.registry.remove(conn.id()) {
            Ok(Some(_)) => {
                self.metrics.connection_removed();
                if !self.shutdown.is_cancelled() {
                    let notice = Notice::Disconnected {
                        id: conn.id(),
                        addr: conn.peer_addr(),
                    };
                    if let Err(err) = self.broadcast(&notice.to_string(), None).await {
                        warn!(error = %err, "Failed to announce disconnect");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(id = %conn.id(), error = %err, "Failed to deregister connection"),
        }

        if let Err(err) = conn.close().await {
            debug!(id = %conn.id(), error = %err, "Close failed");
        }
    }

    /// Remove a connection, notify the others, and close it.
    ///
    /// # Errors
    /// Returns `ProtocolError::NotFound` if `id` is not registered.
    pub async fn disconnect(&self, id: ConnectionId) -> Result<()> {
        let conn = self.registry.get(id)?;
        self.close_connection(&conn).await;
        Ok(())
    }

    /// Send one message to one client; returns the payload size written.
    ///
    /// # Errors
    /// - `ProtocolError::NotFound` if `id` is not registered
    /// - `ProtocolError::PayloadTooLarge` if the cipher cannot carry `text`
    /// - `ProtocolError::ConnectionClosed` if the client is gone
    #[instrument(skip(self, text), fields(len = text.len()))]
    pub async fn send_to(&self, id: ConnectionId, text: &str) -> Result<usize> {
        let sent = self.registry.get(id)?.send_text(text).await?;
        self.metrics.message_sent(sent as u64);
        Ok(sent)
    }

    /// Receive one message from one client, bounded by `idle_timeout`.
    ///
    /// A timeout leaves the connection registered and usable: bytes of a
    /// partly received frame stay buffered for the next call.
    ///
    /// # Errors
    /// Returns `ProtocolError::NotFound` if `id` is not registered.
    pub async fn receive_from(&self, id: ConnectionId) -> Result<String> {
        let conn = self.registry.get(id)?;
        self.recv(&conn).await
    }

    /// Send `text` to every registered client except `exclude`.
    ///
    /// Recipients are snapshotted under the registry lock; the sends happen
    /// afterwards, concurrently, each bounded by `send_timeout`. A failed
    /// recipient is logged and listed in the report, never propagated. The
    /// worker loop answers a non-empty `oversized` list with
    /// [`Notice::Undelivered`] to the sender.
    #[instrument(skip(self, text), fields(len = text.len(), exclude = ?exclude))]
    pub async fn broadcast(
        &self,
        text: &str,
        exclude: Option<ConnectionId>,
    ) -> Result<BroadcastReport> {
        let recipients = self.registry.list_except(exclude)?;
        self.metrics.broadcast_started();
        let _timer = Timer::start("broadcast");

        let results = join_all(
            recipients
                .iter()
                .map(|conn| async move { (conn.id(), conn.send_text(text).await) }),
        )
        .await;

        let mut report = BroadcastReport::default();
        for (id, result) in results {
            match result {
                Ok(sent) => {
                    self.metrics.message_sent(sent as u64);
                    report.delivered.push(id);
                }
                Err(err) => {
                    self.metrics.delivery_failed();
                    warn!(recipient = %id, error = %err, "Delivery failed");
                    if matches!(err, ProtocolError::PayloadTooLarge { .. }) {
                        report.oversized.push(id);
                    }
                    report.failed.push(id);
                }
            }
        }

        debug!(
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "Broadcast complete"
        );
        Ok(report)
    }
}

impl fmt::Debug for BroadcastServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("registry", &self.registry)
            .field("shutdown", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
