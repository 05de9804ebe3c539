use crate::service::registry::ConnectionId;
use std::fmt;
use std::net::SocketAddr;

/// Longest text a `SocketAddr` can render to: `[<v6 addr>%<scope>]:<port>`
pub const MAX_ADDR_TEXT_LEN: usize = 1 + 45 + 1 + 10 + 1 + 1 + 5;

/// Most bytes [`ChatMessage`] adds around a body: `[`, a `u64` id, `] `, the
/// sender address and `: `.
///
/// A sender whose cipher has a ceiling must keep its body this far below it,
/// or the relayed line cannot be encrypted for the recipients.
pub const RELAY_OVERHEAD: usize = 1 + 20 + 2 + MAX_ADDR_TEXT_LEN + 2;

/// A chat line relayed by the server, annotated with who sent it.
///
/// Rendered on the wire as `[<id>] <addr>: <body>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: ConnectionId,
    pub sender_addr: SocketAddr,
    pub body: String,
}

impl ChatMessage {
    pub fn new(sender: ConnectionId, sender_addr: SocketAddr, body: impl Into<String>) -> Self {
        Self {
            sender,
            sender_addr,
            body: body.into(),
        }
    }

    /// Length of the `[id] addr: ` prefix for this sender
    pub fn prefix_len(&self) -> usize {
        self.to_string().len() - self.body.len()
    }
}

impl fmt::Display for ChatMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.sender, self.sender_addr, self.body)
    }
}

/// Server-originated announcements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Disconnected { id: ConnectionId, addr: SocketAddr },
    /// Sent back to a sender whose line was too large to encrypt for some recipients
    Undelivered { recipients: usize },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Disconnected { id, addr } => write!(f, "[{id}] {addr} disconnected"),
            Notice::Undelivered { recipients } => {
                write!(f, "message too large to relay to {recipients} client(s)")
            }
        }
    }
}
