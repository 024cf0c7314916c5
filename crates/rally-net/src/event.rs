//! Events delivered to the consumer of a server or client.

use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Identity of a connected peer: its remote `address:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Borrow the identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for PeerId {
    fn from(addr: SocketAddr) -> Self {
        PeerId(addr.to_string())
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        PeerId(s.to_string())
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        PeerId(s)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a server-side connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The peer closed the stream or the transport failed.
    Normal,
    /// The server disconnected the peer explicitly.
    Kicked,
    /// The idle sweep found the peer silent past the timeout.
    Timeout,
}

/// Lifecycle and data events emitted by [`GameServer`](crate::GameServer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A peer finished setup and is registered.
    Connected(PeerId),
    /// A peer's connection ended. Emitted once per connection.
    Disconnected(PeerId, DisconnectReason),
    /// Bytes from one read on the peer's stream.
    Data(PeerId, Vec<u8>),
}

/// Lifecycle and data events emitted by [`GameClient`](crate::GameClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection to the server is up.
    Connected,
    /// The connection ended.
    Disconnected,
    /// Bytes from one read on the stream.
    Data(Vec<u8>),
}
