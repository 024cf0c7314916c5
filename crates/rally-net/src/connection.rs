//! Per-peer connection record.

use std::io;
use std::sync::{Mutex as StdMutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::{Mutex, watch};

use crate::{DisconnectReason, PeerId, Transport};

/// Upper bound on flushing a transport shutdown (e.g. TLS `close_notify`).
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// State owned by one live connection.
///
/// The write half sits behind an async mutex so only one send is in flight
/// at a time, while the receive loop reads the other half concurrently.
/// Once [`close`](Self::close) runs the write half is gone and later sends
/// are dropped.
pub struct Connection {
    peer: PeerId,
    writer: Mutex<Option<WriteHalf<Transport>>>,
    close_tx: watch::Sender<bool>,
    last_seen: StdMutex<Instant>,
    reason: OnceLock<DisconnectReason>,
    encrypted: bool,
}

impl Connection {
    /// Create a record around the write half of an established transport.
    pub fn new(peer: PeerId, writer: WriteHalf<Transport>, encrypted: bool) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            peer,
            writer: Mutex::new(Some(writer)),
            close_tx,
            last_seen: StdMutex::new(Instant::now()),
            reason: OnceLock::new(),
            encrypted,
        }
    }

    /// Identity of the remote peer.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Whether the transport is TLS.
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.set_last_seen(Instant::now());
    }

    pub(crate) fn set_last_seen(&self, at: Instant) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    /// When the peer last delivered data (or connected).
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record why this connection is ending. Only the first call has effect;
    /// returns whether this call set the reason.
    pub fn mark(&self, reason: DisconnectReason) -> bool {
        self.reason.set(reason).is_ok()
    }

    /// The reason to report at teardown. Unmarked connections ended normally.
    pub fn reason(&self) -> DisconnectReason {
        self.reason.get().copied().unwrap_or(DisconnectReason::Normal)
    }

    /// Watch that flips to `true` once [`close`](Self::close) is called.
    pub fn closed(&self) -> watch::Receiver<bool> {
        self.close_tx.subscribe()
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Write all of `bytes` and flush under the send guard.
    ///
    /// A closed connection drops the bytes and returns `Ok`. A write still
    /// in flight when [`close`](Self::close) is called is abandoned, so a
    /// peer that stopped reading cannot hold the guard past teardown.
    pub async fn send(&self, bytes: &[u8]) -> io::Result<()> {
        let mut closed_rx = self.close_tx.subscribe();
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            tracing::trace!("Dropping {} bytes for closed connection {}", bytes.len(), self.peer);
            return Ok(());
        };
        tokio::select! {
            result = async {
                writer.write_all(bytes).await?;
                writer.flush().await
            } => result,
            _ = closed_rx.wait_for(|closed| *closed) => {
                tracing::debug!("Send of {} bytes to {} abandoned on close", bytes.len(), self.peer);
                Ok(())
            }
        }
    }

    /// Signal the receive loop to stop and release the write half.
    ///
    /// Idempotent. Shutdown errors are logged, not returned. A transport
    /// that cannot flush its shutdown within [`CLOSE_TIMEOUT`] is dropped
    /// as is.
    pub async fn close(&self) {
        self.close_tx.send_replace(true);
        let Some(mut writer) = self.writer.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Shutdown of {} failed: {e}", self.peer),
            Err(_) => tracing::debug!("Shutdown of {} timed out", self.peer),
        }
    }
}
