//! TCP server for accepting and managing client connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;

use crate::idle::idle_monitor;
use crate::platform::{self, SocketConfig};
use crate::receive::{LoopExit, RETRY_BACKOFF, receive_loop};
use crate::{
    Connection, ConnectionRegistry, DisconnectReason, NetError, PeerId, ServerConfig,
    ServerEvent, Transport, tls,
};

/// State shared between the public handle and the background tasks.
struct Shared {
    config: ServerConfig,
    socket: SocketConfig,
    registry: Arc<ConnectionRegistry>,
    acceptor: Option<TlsAcceptor>,
    events: mpsc::UnboundedSender<ServerEvent>,
    shutdown_tx: watch::Sender<bool>,
}

/// TCP game server that accepts connections and manages their lifecycle.
///
/// Events for every connection are delivered on the receiver returned by
/// [`GameServer::new`]. Dropping the server signals shutdown.
pub struct GameServer {
    shared: Arc<Shared>,
    running: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl GameServer {
    /// Create a server, validating `config` and loading TLS material up front.
    pub fn new(
        config: ServerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>), NetError> {
        config.validate()?;
        let acceptor = if config.tls_enabled {
            Some(tls::server_acceptor(&config)?)
        } else {
            None
        };
        let (events, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);

        let shared = Shared {
            registry: Arc::new(ConnectionRegistry::new(config.max_connections)),
            socket: SocketConfig::default(),
            config,
            acceptor,
            events,
            shutdown_tx,
        };
        let server = Self {
            shared: Arc::new(shared),
            running: AtomicBool::new(false),
            local_addr: OnceLock::new(),
        };
        Ok((server, events_rx))
    }

    /// Bind the configured address and start accepting in the background.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 is used.
    pub async fn start(&self) -> Result<SocketAddr, NetError> {
        if *self.shared.shutdown_tx.borrow() {
            return Err(NetError::ShutDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(NetError::AlreadyRunning);
        }

        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;
        let _ = self.local_addr.set(local_addr);
        tracing::info!(
            "Server listening on {local_addr} (tls: {})",
            self.shared.acceptor.is_some()
        );

        tokio::spawn(Self::accept_loop(Arc::clone(&self.shared), listener));

        if let Some(timeout) = self.shared.config.idle_timeout() {
            tokio::spawn(idle_monitor(
                Arc::clone(&self.shared.registry),
                timeout,
                self.shared.config.idle_check_interval(),
                self.shared.shutdown_tx.subscribe(),
            ));
        }

        Ok(local_addr)
    }

    fn bind(&self) -> Result<TcpListener, NetError> {
        let addr = self.shared.config.socket_addr()?;
        Ok(platform::create_listener(addr, &self.shared.socket)?)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Write `bytes` to `peer`. Unknown peers are ignored.
    pub async fn send(&self, peer: &PeerId, bytes: &[u8]) -> Result<(), NetError> {
        let Some(conn) = self.shared.registry.get(peer).await else {
            tracing::trace!("Send to unknown peer {peer} ignored");
            return Ok(());
        };
        conn.send(bytes).await?;
        Ok(())
    }

    /// Write UTF-8 `text` to `peer`. Unknown peers are ignored.
    pub async fn send_text(&self, peer: &PeerId, text: &str) -> Result<(), NetError> {
        self.send(peer, text.as_bytes()).await
    }

    /// Write `bytes` to every connected peer. Returns how many writes succeeded.
    pub async fn broadcast(&self, bytes: &[u8]) -> usize {
        let mut delivered = 0;
        for conn in self.shared.registry.snapshot().await {
            match conn.send(bytes).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::debug!("Broadcast to {} failed: {e}", conn.peer()),
            }
        }
        delivered
    }

    /// Identities of every connected peer.
    pub async fn clients(&self) -> Vec<PeerId> {
        self.shared.registry.peers().await
    }

    /// Whether `peer` is currently connected.
    pub async fn is_connected(&self, peer: &PeerId) -> bool {
        self.shared.registry.contains(peer).await
    }

    /// Number of connected peers.
    pub async fn connection_count(&self) -> usize {
        self.shared.registry.len().await
    }

    /// Disconnect `peer`, reporting [`DisconnectReason::Kicked`] unless it
    /// was already marked timed out. Unknown peers are ignored.
    pub async fn disconnect_client(&self, peer: &PeerId) {
        let Some(conn) = self.shared.registry.get(peer).await else {
            tracing::debug!("Disconnect of unknown peer {peer} ignored");
            return;
        };
        conn.mark(DisconnectReason::Kicked);
        tracing::info!("Kicking {peer}");
        self.shared.registry.evict(&conn).await;
    }

    /// Stop accepting, stop every background task and close every connection.
    ///
    /// Safe to call repeatedly and with no connections.
    pub async fn shutdown(&self) {
        if self.shared.shutdown_tx.send_replace(true) {
            return;
        }
        tracing::info!("Server shutting down");
        for conn in self.shared.registry.drain().await {
            conn.close().await;
        }
    }

    async fn accept_loop(shared: Arc<Shared>, listener: TcpListener) {
        let mut shutdown_rx = shared.shutdown_tx.subscribe();

        while !*shutdown_rx.borrow() {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            tokio::spawn(Self::handle_connection(
                                Arc::clone(&shared),
                                stream,
                                peer_addr,
                            ));
                        }
                        Err(e) => {
                            tracing::warn!("Accept failed: {e}");
                            tokio::time::sleep(RETRY_BACKOFF).await;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Accept loop stopped");
    }

    /// Set up one accepted socket and run its receive loop to completion.
    async fn handle_connection(shared: Arc<Shared>, stream: TcpStream, peer_addr: SocketAddr) {
        let peer = PeerId::from(peer_addr);
        if let Err(e) = platform::configure_stream(&stream, &shared.socket) {
            tracing::debug!("Socket options for {peer} not applied: {e}");
        }
        if !shared.registry.has_capacity().await {
            tracing::warn!("Connection limit reached, rejecting {peer}");
            return;
        }

        let transport = match &shared.acceptor {
            Some(acceptor) => {
                let handshake = tls::accept(acceptor, stream, shared.config.mutual_authentication);
                match tokio::time::timeout(shared.config.handshake_timeout(), handshake).await {
                    Ok(Ok(transport)) => transport,
                    Ok(Err(e)) => {
                        tracing::warn!("Dropping {peer}: {e}");
                        return;
                    }
                    Err(_) => {
                        tracing::warn!("Dropping {peer}: TLS handshake timed out");
                        return;
                    }
                }
            }
            None => Transport::from(stream),
        };

        let encrypted = transport.is_encrypted();
        let (mut reader, writer) = transport.split();
        let conn = Arc::new(Connection::new(peer.clone(), writer, encrypted));
        if shared.registry.insert(Arc::clone(&conn)).await.is_err() {
            tracing::warn!("Connection limit reached, rejecting {peer}");
            conn.close().await;
            return;
        }
        conn.touch();
        tracing::info!("Accepted connection from {peer} (tls: {})", conn.is_encrypted());
        let _ = shared.events.send(ServerEvent::Connected(peer.clone()));

        let mut shutdown_rx = shared.shutdown_tx.subscribe();
        let mut closed_rx = conn.closed();
        let exit = receive_loop(
            &mut reader,
            shared.config.receive_buffer_size,
            &mut shutdown_rx,
            &mut closed_rx,
            |bytes| {
                conn.touch();
                tracing::trace!("Connection {peer} received {} bytes", bytes.len());
                let _ = shared.events.send(ServerEvent::Data(peer.clone(), bytes));
            },
        )
        .await;
        if let LoopExit::Failed(e) = &exit {
            tracing::debug!("Connection {peer} failed: {e}");
        }

        shared.registry.remove_if_current(&conn).await;
        let reason = conn.reason();
        tracing::info!("Connection {peer} closed ({reason:?})");
        let _ = shared.events.send(ServerEvent::Disconnected(peer, reason));
        conn.close().await;
    }
}

impl Drop for GameServer {
    fn drop(&mut self) {
        self.shared.shutdown_tx.send_replace(true);
    }
}
