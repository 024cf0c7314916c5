//! TCP client for connecting to a Rally game server.
//!
//! Manages one outbound connection: connect, optional TLS handshake, a
//! background receive loop, and clean disconnect. State changes are
//! broadcast via a [`watch`] channel so any number of consumers can react
//! without polling; data and lifecycle events arrive on an unbounded
//! channel returned from [`GameClient::connect`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsConnector;

use crate::platform::{self, SocketConfig};
use crate::receive::{LoopExit, receive_loop};
use crate::{ClientConfig, ClientEvent, Connection, NetError, PeerId, Transport, tls};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Attempting to establish the connection.
    Connecting,
    /// Connection established, ready for communication.
    Connected,
    /// Connection lost or intentionally closed.
    Disconnected,
}

/// Observable connection state backed by a [`watch`] channel.
///
/// Multiple subscribers can observe state transitions without polling.
pub struct ConnectionStateWatch {
    tx: watch::Sender<ConnectionState>,
}

impl Default for ConnectionStateWatch {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateWatch {
    /// Create a new watch initialized to [`ConnectionState::Disconnected`].
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    /// Set the current connection state, notifying all subscribers.
    pub fn set(&self, state: ConnectionState) {
        self.tx.send_replace(state);
    }

    /// Return a new subscriber receiver.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Return the current state without blocking.
    pub fn current(&self) -> ConnectionState {
        *self.tx.borrow()
    }
}

/// Handle to a connected game server session.
///
/// Created via [`GameClient::connect`]. Dropping the client stops its
/// receive loop.
pub struct GameClient {
    conn: Arc<Connection>,
    state: Arc<ConnectionStateWatch>,
    server_addr: SocketAddr,
    /// Sending `true` causes the receive loop to exit.
    shutdown_tx: watch::Sender<bool>,
}

impl GameClient {
    /// Connect to the server described by `config`.
    ///
    /// Performs the TCP connect and, if enabled, the TLS handshake within
    /// `connect_timeout_ms`, then spawns the receive loop. The first event on
    /// the returned channel is [`ClientEvent::Connected`].
    pub async fn connect(
        config: ClientConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>), NetError> {
        config.validate()?;
        let connector = if config.tls_enabled {
            Some(tls::client_connector(&config)?)
        } else {
            None
        };

        let state = Arc::new(ConnectionStateWatch::new());
        state.set(ConnectionState::Connecting);

        let establish = Self::establish(&config, connector.as_ref());
        let (transport, server_addr) =
            match tokio::time::timeout(config.connect_timeout(), establish).await {
                Ok(Ok(established)) => established,
                Ok(Err(e)) => {
                    state.set(ConnectionState::Disconnected);
                    return Err(e);
                }
                Err(_) => {
                    state.set(ConnectionState::Disconnected);
                    return Err(NetError::Timeout);
                }
            };

        let encrypted = transport.is_encrypted();
        let (mut reader, writer) = transport.split();
        let conn = Arc::new(Connection::new(PeerId::from(server_addr), writer, encrypted));
        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        state.set(ConnectionState::Connected);
        tracing::info!("Connected to {server_addr} (tls: {})", conn.is_encrypted());
        let _ = events.send(ClientEvent::Connected);

        let reader_conn = Arc::clone(&conn);
        let reader_state = Arc::clone(&state);
        let buffer_size = config.receive_buffer_size;
        tokio::spawn(async move {
            let mut closed_rx = reader_conn.closed();
            let exit = receive_loop(
                &mut reader,
                buffer_size,
                &mut shutdown_rx,
                &mut closed_rx,
                |bytes| {
                    reader_conn.touch();
                    tracing::trace!("Received {} bytes from {server_addr}", bytes.len());
                    let _ = events.send(ClientEvent::Data(bytes));
                },
            )
            .await;
            if let LoopExit::Failed(e) = &exit {
                tracing::debug!("Connection to {server_addr} failed: {e}");
            }

            reader_state.set(ConnectionState::Disconnected);
            tracing::info!("Disconnected from {server_addr}");
            let _ = events.send(ClientEvent::Disconnected);
            reader_conn.close().await;
        });

        let client = Self {
            conn,
            state,
            server_addr,
            shutdown_tx,
        };
        Ok((client, events_rx))
    }

    async fn establish(
        config: &ClientConfig,
        connector: Option<&TlsConnector>,
    ) -> Result<(Transport, SocketAddr), NetError> {
        let stream = TcpStream::connect(config.endpoint()).await?;
        let server_addr = stream.peer_addr()?;
        if let Err(e) = platform::configure_stream(&stream, &SocketConfig::default()) {
            tracing::debug!("Socket options for {server_addr} not applied: {e}");
        }

        let transport = match connector {
            Some(connector) => {
                let server_name = config
                    .server_name
                    .as_deref()
                    .unwrap_or(&config.server_address);
                tls::connect(connector, server_name, stream).await?
            }
            None => Transport::from(stream),
        };
        Ok((transport, server_addr))
    }

    /// Return the connection state watch.
    pub fn state(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    /// Whether the connection is currently up.
    pub fn is_connected(&self) -> bool {
        self.state.current() == ConnectionState::Connected && !self.conn.is_closed()
    }

    /// Resolved address of the server.
    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Write `bytes` to the server.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        self.conn.send(bytes).await?;
        Ok(())
    }

    /// Write UTF-8 `text` to the server.
    pub async fn send_text(&self, text: &str) -> Result<(), NetError> {
        self.send(text.as_bytes()).await
    }

    /// Disconnect from the server.
    ///
    /// Signals the receive loop to exit, transitions state to
    /// [`ConnectionState::Disconnected`] immediately and closes the stream.
    /// Safe to call more than once.
    pub async fn disconnect(&self) {
        self.shutdown_tx.send_replace(true);
        self.state.set(ConnectionState::Disconnected);
        self.conn.close().await;
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}
