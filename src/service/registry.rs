//! # Connection Registry
//!
//! Shared table of live connections, keyed by a monotonically increasing id.
//!
//! Ids come from a counter that only moves forward, so an id is never handed
//! out twice even after its connection is gone. Every add, remove and listing
//! happens under one mutex; the lock is never held across an `.await`, callers
//! get `Arc<Connection>` snapshots and do their I/O after it is released.

use crate::error::{ProtocolError, Result};
use crate::service::channel::{MessageReader, MessageWriter};

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Identifier assigned to a connection when it is registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One registered peer.
///
/// Reads and writes are serialized independently: the connection's worker owns
/// the read side in practice, while any number of broadcasts may queue on the
/// write lock without interleaving partial frames.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    encrypted: bool,
    reader: AsyncMutex<MessageReader>,
    writer: AsyncMutex<MessageWriter>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Receive one text message from this peer
    pub async fn recv_text(&self) -> Result<String> {
        self.reader.lock().await.recv_text().await
    }

    /// Send one text message to this peer; returns the payload size written
    pub async fn send_text(&self, text: &str) -> Result<usize> {
        self.writer.lock().await.send_text(text).await
    }

    /// Shut down the write direction
    pub async fn close(&self) -> Result<()> {
        self.writer.lock().await.close().await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}

struct RegistryInner {
    next_id: u64,
    connections: BTreeMap<ConnectionId, Arc<Connection>>,
}

/// Guarded id → connection table
pub struct ConnectionRegistry {
    inner: Mutex<RegistryInner>,
    max_connections: usize,
}

impl ConnectionRegistry {
    pub fn new(max_connections: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                connections: BTreeMap::new(),
            }),
            max_connections,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryInner>> {
        self.inner.lock().map_err(|_| ProtocolError::LockPoisoned)
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Register a connection under the next id.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConnectionLimit` when the table is full.
    pub fn add(
        &self,
        peer_addr: SocketAddr,
        reader: MessageReader,
        writer: MessageWriter,
    ) -> Result<ConnectionId> {
        let mut inner = self.lock()?;
        if inner.connections.len() >= self.max_connections {
            return Err(ProtocolError::ConnectionLimit(self.max_connections));
        }

        let id = ConnectionId(inner.next_id);
        inner.next_id += 1;

        let encrypted = reader.is_encrypted() || writer.is_encrypted();
        let connection = Arc::new(Connection {
            id,
            peer_addr,
            encrypted,
            reader: AsyncMutex::new(reader),
            writer: AsyncMutex::new(writer),
        });
        inner.connections.insert(id, connection);

        debug!(id = %id, peer = %peer_addr, live = inner.connections.len(), "Registered connection");
        Ok(id)
    }

    /// Remove a connection. Removing an id that is already gone is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Result<Option<Arc<Connection>>> {
        let removed = self.lock()?.connections.remove(&id);
        if removed.is_some() {
            debug!(id = %id, "Deregistered connection");
        }
        Ok(removed)
    }

    /// # Errors
    /// Returns `ProtocolError::NotFound` if no connection has this id.
    pub fn get(&self, id: ConnectionId) -> Result<Arc<Connection>> {
        self.lock()?
            .connections
            .get(&id)
            .cloned()
            .ok_or(ProtocolError::NotFound(id))
    }

    /// Snapshot of every connection except `exclude`, in registration order
    pub fn list_except(&self, exclude: Option<ConnectionId>) -> Result<Vec<Arc<Connection>>> {
        Ok(self
            .lock()?
            .connections
            .values()
            .filter(|conn| Some(conn.id) != exclude)
            .cloned()
            .collect())
    }

    pub fn ids(&self) -> Result<Vec<ConnectionId>> {
        Ok(self.lock()?.connections.keys().copied().collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.connections.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.connections.is_empty())
    }

    /// Remove everything, returning what was registered
    pub fn clear(&self) -> Result<Vec<Arc<Connection>>> {
        let drained = std::mem::take(&mut self.lock()?.connections);
        Ok(drained.into_values().collect())
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}
