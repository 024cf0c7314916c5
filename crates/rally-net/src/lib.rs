//! TCP networking: connection acceptance, optional TLS, per-connection
//! receive loops, idle reaping and event delivery for server and client.
//!
//! Payloads are opaque: whatever one read returns is delivered as one
//! [`ServerEvent::Data`] or [`ClientEvent::Data`]. Consumers that need
//! message boundaries layer their own framing on top.

mod config;
mod connection;
mod error;
mod event;
pub mod idle;
pub mod platform;
mod receive;
mod registry;
pub mod tcp_client;
pub mod tcp_server;
pub mod tls;
mod transport;

pub use config::{ClientConfig, DEFAULT_RECEIVE_BUFFER, MAX_RECEIVE_BUFFER, ServerConfig};
pub use connection::{CLOSE_TIMEOUT, Connection};
pub use error::NetError;
pub use event::{ClientEvent, DisconnectReason, PeerId, ServerEvent};
pub use receive::RETRY_BACKOFF;
pub use registry::{ConnectionLimitReached, ConnectionRegistry};
pub use tcp_client::{ConnectionState, ConnectionStateWatch, GameClient};
pub use tcp_server::GameServer;
pub use transport::Transport;
