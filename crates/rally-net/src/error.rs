//! Error types for the networking layer.

use std::path::PathBuf;

/// Errors surfaced by [`GameServer`](crate::GameServer) and
/// [`GameClient`](crate::GameClient).
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The configured address and port do not form a socket address.
    #[error("invalid bind address {address}:{port}")]
    InvalidBindAddress {
        /// Configured host part.
        address: String,
        /// Configured port.
        port: u16,
    },

    /// Receive buffer size outside `1..=65535`.
    #[error("receive buffer size {0} out of range (1-65535)")]
    InvalidBufferSize(usize),

    /// `start` was called on a server that is already running.
    #[error("server is already running")]
    AlreadyRunning,

    /// `start` was called after `shutdown`.
    #[error("server has been shut down")]
    ShutDown,

    /// The client has no live connection.
    #[error("not connected")]
    NotConnected,

    /// TLS settings are inconsistent or the rustls configuration failed.
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// A certificate or key file could not be loaded.
    #[error("failed to load {path}: {reason}")]
    Certificate {
        /// File that failed to load.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The TLS handshake failed or produced a session that violates policy.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// Connecting or handshaking took longer than allowed.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rustls::Error> for NetError {
    fn from(err: rustls::Error) -> Self {
        NetError::Tls(err.to_string())
    }
}
