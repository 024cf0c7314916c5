//! Server and client connection settings.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::NetError;

/// Largest accepted receive buffer.
pub const MAX_RECEIVE_BUFFER: usize = 65_535;

/// Default bytes read per receive call.
pub const DEFAULT_RECEIVE_BUFFER: usize = 4096;

/// Configuration for [`GameServer`](crate::GameServer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// IP address to bind to. Default: `0.0.0.0`.
    pub bind_address: String,
    /// Port to bind to. Default: 7777. Port 0 picks an ephemeral port.
    pub bind_port: u16,
    /// Wrap every accepted connection in TLS.
    pub tls_enabled: bool,
    /// PEM certificate chain presented to clients.
    pub certificate_file: Option<PathBuf>,
    /// PEM private key. Read from `certificate_file` when unset.
    pub private_key_file: Option<PathBuf>,
    /// Password for an `ENCRYPTED PRIVATE KEY` (PKCS#8) block.
    pub private_key_password: Option<String>,
    /// PEM roots used to validate client certificates under mutual authentication.
    pub client_ca_file: Option<PathBuf>,
    /// Maximum bytes delivered per data event (1-65535). Default: 4096.
    pub receive_buffer_size: usize,
    /// Disconnect peers silent for this many seconds. 0 disables the sweep.
    pub idle_timeout_secs: u64,
    /// Period of the idle sweep in milliseconds. Default: 5000.
    pub idle_check_interval_ms: u64,
    /// Skip certificate chain validation entirely. Insecure; off by default.
    pub accept_invalid_certificates: bool,
    /// Require clients to present a certificate.
    pub mutual_authentication: bool,
    /// Maximum concurrent connections. Default: 256.
    pub max_connections: usize,
    /// Give up on TLS handshakes after this many milliseconds. Default: 10000.
    pub handshake_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            bind_port: 7777,
            tls_enabled: false,
            certificate_file: None,
            private_key_file: None,
            private_key_password: None,
            client_ca_file: None,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER,
            idle_timeout_secs: 0,
            idle_check_interval_ms: 5000,
            accept_invalid_certificates: false,
            mutual_authentication: false,
            max_connections: 256,
            handshake_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Check the settings that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), NetError> {
        validate_buffer_size(self.receive_buffer_size)?;
        self.socket_addr()?;
        if self.tls_enabled && self.certificate_file.is_none() {
            return Err(NetError::Tls(
                "tls_enabled requires a certificate_file".to_string(),
            ));
        }
        if self.tls_enabled
            && self.mutual_authentication
            && !self.accept_invalid_certificates
            && self.client_ca_file.is_none()
        {
            return Err(NetError::Tls(
                "mutual_authentication requires a client_ca_file".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the configured bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, NetError> {
        self.bind_address
            .parse::<IpAddr>()
            .map(|ip| SocketAddr::new(ip, self.bind_port))
            .map_err(|_| NetError::InvalidBindAddress {
                address: self.bind_address.clone(),
                port: self.bind_port,
            })
    }

    /// Idle timeout, or `None` when the sweep is disabled.
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs))
    }

    pub(crate) fn idle_check_interval(&self) -> Duration {
        Duration::from_millis(self.idle_check_interval_ms.max(1))
    }

    pub(crate) fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

/// Configuration for [`GameClient`](crate::GameClient).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or IP of the server. Default: `127.0.0.1`.
    pub server_address: String,
    /// Server port. Default: 7777.
    pub server_port: u16,
    /// Connect over TLS.
    pub tls_enabled: bool,
    /// PEM client certificate offered for mutual authentication.
    pub certificate_file: Option<PathBuf>,
    /// PEM private key for the client certificate. Read from `certificate_file` when unset.
    pub private_key_file: Option<PathBuf>,
    /// Password for an encrypted client key.
    pub private_key_password: Option<String>,
    /// PEM roots used to validate the server certificate.
    pub ca_file: Option<PathBuf>,
    /// Name checked against the server certificate. Defaults to `server_address`.
    pub server_name: Option<String>,
    /// Skip server certificate validation. Insecure; off by default.
    pub accept_invalid_certificates: bool,
    /// Maximum bytes delivered per data event (1-65535). Default: 4096.
    pub receive_buffer_size: usize,
    /// Give up on connect plus handshake after this many milliseconds. Default: 5000.
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1".to_string(),
            server_port: 7777,
            tls_enabled: false,
            certificate_file: None,
            private_key_file: None,
            private_key_password: None,
            ca_file: None,
            server_name: None,
            accept_invalid_certificates: false,
            receive_buffer_size: DEFAULT_RECEIVE_BUFFER,
            connect_timeout_ms: 5000,
        }
    }
}

impl ClientConfig {
    /// Check the settings that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), NetError> {
        validate_buffer_size(self.receive_buffer_size)?;
        if self.tls_enabled && !self.accept_invalid_certificates && self.ca_file.is_none() {
            return Err(NetError::Tls(
                "TLS server validation requires a ca_file".to_string(),
            ));
        }
        Ok(())
    }

    /// `host:port` string handed to the resolver.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.server_address, self.server_port)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn validate_buffer_size(size: usize) -> Result<(), NetError> {
    if (1..=MAX_RECEIVE_BUFFER).contains(&size) {
        Ok(())
    } else {
        Err(NetError::InvalidBufferSize(size))
    }
}
